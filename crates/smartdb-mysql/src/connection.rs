//! MySQL connection, result set and driver.
//!
//! The connection speaks the text protocol over a blocking `TcpStream`:
//! handshake and authentication on `open`, COM_QUERY for statements. Result
//! sets are read to completion before being handed out, so the cursor never
//! holds the wire.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use smartdb_core::{log_error, Connection, DbResult, Driver, Error, ErrorKind, ResultSet, Value};

use crate::auth;
use crate::config::{MySqlConfig, CONNECT_TIMEOUT};
use crate::protocol::{
    build_command_packet, build_packet_from_payload, capabilities, Command, ErrPacket,
    PacketHeader, PacketReader, PacketType, PacketWriter, MAX_PACKET_SIZE,
};
use crate::types::{count_placeholders, decode_text_value, interpolate_params, ColumnDef, FieldType};

/// Server handshake data kept for the connection's lifetime.
#[derive(Debug, Clone)]
struct ServerHandshake {
    capabilities: u32,
    server_version: String,
    connection_id: u32,
    auth_plugin: String,
    auth_data: Vec<u8>,
}

/// A connection to one MySQL server.
///
/// Created Closed from its configuration; [`open`](Connection::open) dials
/// TCP and completes the handshake.
pub struct MySqlConnection {
    config: MySqlConfig,
    stream: Option<TcpStream>,
    handshake: Option<ServerHandshake>,
    sequence_id: u8,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("open", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Create a Closed connection for the given configuration.
    pub fn new(config: MySqlConfig) -> Self {
        Self {
            config,
            stream: None,
            handshake: None,
            sequence_id: 0,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    /// Server version string, once open.
    pub fn server_version(&self) -> Option<&str> {
        self.handshake.as_ref().map(|h| h.server_version.as_str())
    }

    /// Connection id assigned by the server, once open.
    pub fn connection_id(&self) -> Option<u32> {
        self.handshake.as_ref().map(|h| h.connection_id)
    }

    /// Last-insert id reported by the most recent statement.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Affected-row count reported by the most recent statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Whether the server reports an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.status_flags & crate::protocol::server_status::SERVER_STATUS_IN_TRANS != 0
    }

    fn connect_stream(&self) -> DbResult<TcpStream> {
        let addrs = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::connection(format!(
                    "Failed to resolve {}: {}",
                    self.config.socket_addr(),
                    e
                ))
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => Error::connection(format!(
                "Failed to connect to {}: {}",
                self.config.socket_addr(),
                e
            )),
            None => Error::connection(format!(
                "Failed to resolve {}: no addresses",
                self.config.socket_addr()
            )),
        })
    }

    /// Read one logical packet, reassembling 16MB continuations.
    fn read_packet(&mut self) -> DbResult<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header_bytes = [0u8; PacketHeader::SIZE];
            self.stream_mut()?.read_exact(&mut header_bytes).map_err(|e| {
                Error::connection(format!("Failed to read packet header: {}", e))
            })?;
            let header = PacketHeader::from_bytes(&header_bytes);
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream_mut()?
                .read_exact(&mut payload[start..])
                .map_err(|e| Error::connection(format!("Failed to read packet payload: {}", e)))?;

            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    fn write_raw(&mut self, framed: &[u8]) -> DbResult<()> {
        let stream = self.stream_mut()?;
        stream
            .write_all(framed)
            .and_then(|()| stream.flush())
            .map_err(|e| Error::connection(format!("Failed to write packet: {}", e)))
    }

    fn write_payload(&mut self, payload: &[u8]) -> DbResult<()> {
        let framed = build_packet_from_payload(payload, self.sequence_id);
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self.write_raw(&framed)
    }

    fn stream_mut(&mut self) -> DbResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::connection("Connection is not open"))
    }

    fn read_handshake(&mut self) -> DbResult<ServerHandshake> {
        let payload = self.read_packet()?;
        let mut reader = PacketReader::new(&payload);

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("Missing protocol version"))?;
        if protocol_version == 0xFF {
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .ok_or_else(|| protocol_error("Invalid error packet"))?;
            return Err(connection_err(&err));
        }
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "Unsupported protocol version: {}",
                protocol_version
            )));
        }

        let server_version = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("Missing server version"))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error("Missing connection id"))?;
        let auth_data_1 = reader
            .read_bytes(8)
            .ok_or_else(|| protocol_error("Missing auth data"))?
            .to_vec();
        reader.skip(1); // filler

        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| protocol_error("Missing capability flags"))?;
        reader.read_u8(); // server charset
        reader.read_u16_le(); // status flags
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let server_caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_u8().unwrap_or(0) as usize
        } else {
            0
        };
        reader.skip(10); // reserved

        let mut auth_data = auth_data_1;
        if server_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len2 = if auth_data_len > 8 {
                auth_data_len - 8
            } else {
                13
            };
            if let Some(part2) = reader.read_bytes(len2) {
                let trimmed = match part2.last() {
                    Some(0) => &part2[..part2.len() - 1],
                    _ => part2,
                };
                auth_data.extend_from_slice(trimmed);
            }
        }

        let auth_plugin = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader
                .read_null_string()
                .unwrap_or_else(|| auth::plugins::MYSQL_NATIVE_PASSWORD.to_string())
        } else {
            auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(ServerHandshake {
            capabilities: server_caps,
            server_version,
            connection_id,
            auth_plugin,
            auth_data,
        })
    }

    fn client_capabilities(&self, server_caps: u32) -> u32 {
        let mut flags = capabilities::DEFAULT_CLIENT_FLAGS;
        if !self.config.database.is_empty() {
            flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }
        flags & server_caps
    }

    fn send_handshake_response(&mut self, handshake: &ServerHandshake) -> DbResult<()> {
        let client_caps = self.client_capabilities(handshake.capabilities);
        let auth_response = auth::compute_response(
            &handshake.auth_plugin,
            &self.config.password,
            &handshake.auth_data,
        );

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(MAX_PACKET_SIZE as u32);
        writer.write_u8(self.config.charset_byte());
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            writer.write_u8(auth_response.len() as u8);
            writer.write_bytes(&auth_response);
        } else {
            writer.write_bytes(&auth_response);
            writer.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(&self.config.database);
        }
        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(&handshake.auth_plugin);
        }

        self.write_payload(writer.as_bytes())
    }

    fn handle_auth_result(&mut self) -> DbResult<()> {
        let payload = self.read_packet()?;
        if payload.is_empty() {
            return Err(protocol_error("Empty authentication response"));
        }

        match PacketType::from_first_byte(payload[0], payload.len()) {
            PacketType::Ok => {
                if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            PacketType::Error => {
                let err = PacketReader::new(&payload)
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("Invalid error packet"))?;
                Err(Error::authentication(format!(
                    "Authentication failed: {} ({})",
                    err.error_message, err.error_code
                ))
                .with_code(i32::from(err.error_code)))
            }
            PacketType::Eof => self.handle_auth_switch(&payload[1..]),
            _ => self.handle_additional_auth(&payload),
        }
    }

    fn handle_auth_switch(&mut self, data: &[u8]) -> DbResult<()> {
        let mut reader = PacketReader::new(data);
        let plugin = reader
            .read_null_string()
            .ok_or_else(|| protocol_error("Missing plugin name in auth switch"))?;
        let auth_data = reader.read_rest().to_vec();

        let response = auth::compute_response(&plugin, &self.config.password, &auth_data);
        self.write_payload(&response)?;
        self.handle_auth_result()
    }

    fn handle_additional_auth(&mut self, data: &[u8]) -> DbResult<()> {
        // caching_sha2_password status byte arrives as 0x01 <status>.
        let status = match data {
            [0x01, status, ..] => *status,
            [status, ..] => *status,
            [] => return Err(protocol_error("Empty additional auth data")),
        };

        match status {
            auth::caching_sha2::FAST_AUTH_SUCCESS => {
                let payload = self.read_packet()?;
                if let Some(ok) = PacketReader::new(&payload).parse_ok_packet() {
                    self.status_flags = ok.status_flags;
                }
                Ok(())
            }
            auth::caching_sha2::PERFORM_FULL_AUTH => Err(Error::authentication(
                "caching_sha2_password full authentication requires a secure channel; \
                 use mysql_native_password or enable the server-side auth cache",
            )),
            _ => match PacketReader::new(data).parse_ok_packet() {
                Some(ok) => {
                    self.status_flags = ok.status_flags;
                    Ok(())
                }
                None => Err(protocol_error(format!(
                    "Unexpected auth response byte: 0x{:02X}",
                    status
                ))),
            },
        }
    }

    /// Send one COM_QUERY and collect the response.
    fn run_query(&mut self, sql: &str, kind: ErrorKind) -> DbResult<QueryOutcome> {
        if self.stream.is_none() {
            return Err(Error::connection("Connection is not open"));
        }

        self.sequence_id = 0;
        let packet = build_command_packet(Command::Query, sql.as_bytes());
        self.sequence_id = 1;
        self.write_raw(&packet)?;

        let payload = self.read_packet()?;
        if payload.is_empty() {
            return Err(protocol_error("Empty query response"));
        }

        match PacketType::from_first_byte(payload[0], payload.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("Invalid OK packet"))?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.status_flags = ok.status_flags;
                Ok(QueryOutcome::Ok {
                    affected_rows: ok.affected_rows,
                })
            }
            PacketType::Error => {
                let err = PacketReader::new(&payload)
                    .parse_err_packet()
                    .ok_or_else(|| protocol_error("Invalid error packet"))?;
                log_error!(
                    "MySQL statement failed: {} ({}) | SQL: {}",
                    err.error_message,
                    err.error_code,
                    sql
                );
                Err(statement_error(&err, kind))
            }
            PacketType::LocalInfile => Err(Error::new(kind, "LOCAL INFILE is not supported")),
            _ => {
                let (cols, rows) = self.read_result_set(&payload, kind)?;
                Ok(QueryOutcome::ResultSet { cols, rows })
            }
        }
    }

    fn read_result_set(
        &mut self,
        first_packet: &[u8],
        kind: ErrorKind,
    ) -> DbResult<(Vec<ColumnDef>, Vec<Vec<Value>>)> {
        let column_count = PacketReader::new(first_packet)
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("Invalid column count"))? as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let payload = self.read_packet()?;
            columns.push(parse_column_def(&payload)?);
        }

        let server_caps = self.handshake.as_ref().map_or(0, |h| h.capabilities);
        if server_caps & capabilities::CLIENT_DEPRECATE_EOF == 0 {
            // Marker between column definitions and rows.
            self.read_packet()?;
        }

        let mut rows = Vec::new();
        loop {
            let payload = self.read_packet()?;
            if payload.is_empty() {
                break;
            }

            match PacketType::from_first_byte(payload[0], payload.len()) {
                PacketType::Ok | PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    if payload[0] == 0xFE {
                        if let Some(eof) = reader.parse_eof_packet() {
                            self.status_flags = eof.status_flags;
                        }
                    } else if let Some(ok) = reader.parse_ok_packet() {
                        self.status_flags = ok.status_flags;
                    }
                    break;
                }
                PacketType::Error => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    return Err(statement_error(&err, kind));
                }
                _ => rows.push(parse_text_row(&payload, &columns)),
            }
        }

        Ok((columns, rows))
    }

    fn execute_inner(&mut self, sql: &str, kind: ErrorKind) -> DbResult<u64> {
        match self.run_query(sql, kind)? {
            QueryOutcome::Ok { affected_rows } => Ok(affected_rows),
            QueryOutcome::ResultSet { .. } => Ok(0),
        }
    }
}

enum QueryOutcome {
    Ok { affected_rows: u64 },
    ResultSet {
        cols: Vec<ColumnDef>,
        rows: Vec<Vec<Value>>,
    },
}

impl Connection for MySqlConnection {
    fn open(&mut self) -> DbResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        self.stream = Some(self.connect_stream()?);
        self.sequence_id = 0;

        let result = self.read_handshake().and_then(|handshake| {
            self.send_handshake_response(&handshake)?;
            self.handle_auth_result()?;
            Ok(handshake)
        });

        match result {
            Ok(handshake) => {
                self.handshake = Some(handshake);
                Ok(())
            }
            Err(err) => {
                self.stream = None;
                self.handshake = None;
                Err(err)
            }
        }
    }

    fn close(&mut self) {
        if self.stream.is_some() {
            // Best-effort goodbye; the socket closes either way.
            self.sequence_id = 0;
            let packet = build_command_packet(Command::Quit, &[]);
            let _ = self.write_raw(&packet);
            self.stream = None;
            self.handshake = None;
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>> {
        match self.run_query(sql, ErrorKind::Query)? {
            QueryOutcome::ResultSet { cols, rows } => {
                Ok(Box::new(MySqlResultSet::new(cols, rows)))
            }
            QueryOutcome::Ok { .. } => Ok(Box::new(MySqlResultSet::new(Vec::new(), Vec::new()))),
        }
    }

    fn execute(&mut self, sql: &str) -> DbResult<u64> {
        if self.stream.is_none() {
            return Err(Error::connection("Connection is not open"));
        }
        self.execute_inner(sql, ErrorKind::Execution)
    }

    fn execute_params(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        if self.stream.is_none() {
            return Err(Error::connection("Connection is not open"));
        }

        let expected = count_placeholders(sql);
        if expected != params.len() {
            return Err(Error::invalid_argument(format!(
                "parameter count mismatch: statement expects {}, got {}",
                expected,
                params.len()
            )));
        }

        let interpolated = interpolate_params(sql, params);
        self.execute_inner(&interpolated, ErrorKind::Execution)
    }

    fn begin(&mut self) -> DbResult<()> {
        self.execute_inner("START TRANSACTION", ErrorKind::Transaction)
            .map(|_| ())
    }

    fn commit(&mut self) -> DbResult<()> {
        self.execute_inner("COMMIT", ErrorKind::Transaction).map(|_| ())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.execute_inner("ROLLBACK", ErrorKind::Transaction).map(|_| ())
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Buffered forward-only cursor over a fully-read result set.
pub struct MySqlResultSet {
    cols: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: Option<usize>,
}

impl MySqlResultSet {
    fn new(columns: Vec<ColumnDef>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            cols: columns.into_iter().map(|c| c.name).collect(),
            rows,
            cursor: None,
        }
    }
}

impl ResultSet for MySqlResultSet {
    fn next(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            true
        } else {
            self.cursor = Some(self.rows.len());
            false
        }
    }

    fn get(&self, index: usize) -> Value {
        let row = match self.cursor.and_then(|c| self.rows.get(c)) {
            Some(row) => row,
            None => return Value::Null,
        };
        row.get(index).cloned().unwrap_or(Value::Null)
    }

    fn get_named(&self, name: &str) -> Value {
        match self.cols.iter().position(|c| c == name) {
            Some(i) => self.get(i),
            None => Value::Null,
        }
    }

    fn column_names(&self) -> &[String] {
        &self.cols
    }
}

/// Driver registering as `"mysql"`.
///
/// Recognized configuration: `host`, `port`, `user`, `password`, `database`,
/// `charset`. Missing fields take their defaults; other fields are ignored.
#[derive(Debug, Default)]
pub struct MySqlDriver;

impl Driver for MySqlDriver {
    fn name(&self) -> &str {
        "mysql"
    }

    fn create_connection(&self, config: &serde_json::Value) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(MySqlConnection::new(MySqlConfig::from_json(
            config,
        ))))
    }
}

fn parse_column_def(payload: &[u8]) -> DbResult<ColumnDef> {
    let mut reader = PacketReader::new(payload);

    // catalog, schema, table, org_table
    for _ in 0..4 {
        reader
            .read_lenenc_string()
            .ok_or_else(|| protocol_error("Truncated column definition"))?;
    }
    let name = reader
        .read_lenenc_string()
        .ok_or_else(|| protocol_error("Column definition missing name"))?;
    reader
        .read_lenenc_string()
        .ok_or_else(|| protocol_error("Truncated column definition"))?; // org_name

    reader.read_lenenc_int(); // fixed-length fields marker (0x0c)
    let charset = reader
        .read_u16_le()
        .ok_or_else(|| protocol_error("Column definition missing charset"))?;
    reader.read_u32_le(); // column length
    let type_byte = reader
        .read_u8()
        .ok_or_else(|| protocol_error("Column definition missing type"))?;
    let flags = reader.read_u16_le().unwrap_or(0);

    Ok(ColumnDef {
        name,
        field_type: FieldType::from_u8(type_byte),
        charset,
        flags,
    })
}

fn parse_text_row(payload: &[u8], columns: &[ColumnDef]) -> Vec<Value> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());

    for column in columns {
        match reader.peek() {
            Some(0xFB) => {
                reader.skip(1);
                values.push(Value::Null);
            }
            Some(_) => match reader.read_lenenc_bytes() {
                Some(cell) => values.push(decode_text_value(column, cell)),
                None => values.push(Value::Null),
            },
            None => values.push(Value::Null),
        }
    }
    values
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::connection(message).retryable(true)
}

fn connection_err(err: &ErrPacket) -> Error {
    Error::connection(format!(
        "{} ({})",
        err.error_message, err.error_code
    ))
    .with_code(i32::from(err.error_code))
}

fn statement_error(err: &ErrPacket, kind: ErrorKind) -> Error {
    let message = if err.sql_state.is_empty() {
        err.error_message.clone()
    } else {
        format!("{} (SQLSTATE {})", err.error_message, err.sql_state)
    };
    Error::new(kind, message).with_code(i32::from(err.error_code))
}
