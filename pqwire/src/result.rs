//! The [`PgResult`] type.
//!
//! A [`PgResult`] is an immutable snapshot of one command outcome. Column
//! values are kept as the raw bytes received from the backend, text or binary
//! according to the column format, no type specific decoding is done here.
use bytes::Bytes;
use std::{fmt, sync::Arc};

use crate::{
    Result,
    common::ByteStr,
    postgres::{
        DbError, INVALID_OID, Oid, PgFormat, ProtocolError,
        backend::{DataRow, FieldDescription},
    },
};

/// Outcome kind of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The string sent to the server was empty.
    EmptyQuery,
    /// Successful completion of a command returning no data.
    CommandOk,
    /// Successful completion of a command returning data.
    TuplesOk,
    /// Copy Out (from server) data transfer started.
    CopyOut,
    /// Copy In (to server) data transfer started.
    CopyIn,
    /// The server's response was not understood.
    BadResponse,
    /// A nonfatal error (a notice or warning) occurred.
    NonfatalError,
    /// A fatal error occurred.
    FatalError,
    /// Copy In/Out data transfer started, used only for streaming replication.
    CopyBoth,
    /// Single row from the current command, only in single-row mode.
    SingleTuple,
}

impl ExecStatus {
    /// Conventional name of the status, e.g. `PGRES_TUPLES_OK`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyQuery => "PGRES_EMPTY_QUERY",
            Self::CommandOk => "PGRES_COMMAND_OK",
            Self::TuplesOk => "PGRES_TUPLES_OK",
            Self::CopyOut => "PGRES_COPY_OUT",
            Self::CopyIn => "PGRES_COPY_IN",
            Self::BadResponse => "PGRES_BAD_RESPONSE",
            Self::NonfatalError => "PGRES_NONFATAL_ERROR",
            Self::FatalError => "PGRES_FATAL_ERROR",
            Self::CopyBoth => "PGRES_COPY_BOTH",
            Self::SingleTuple => "PGRES_SINGLE_TUPLE",
        }
    }

    /// Every status except error and bad response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::BadResponse | Self::NonfatalError | Self::FatalError)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result column descriptor.
#[derive(Debug, Clone)]
pub struct Column {
    name: ByteStr,
    table_oid: Oid,
    column_id: i16,
    type_oid: Oid,
    type_size: i16,
    type_modifier: i32,
    format: PgFormat,
}

impl Column {
    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Oid of the source table, zero if not a simple column reference.
    pub fn table_oid(&self) -> Oid {
        self.table_oid
    }

    /// Attribute number within the source table, zero if not a simple column reference.
    pub fn column_id(&self) -> i16 {
        self.column_id
    }

    pub fn type_oid(&self) -> Oid {
        self.type_oid
    }

    /// Negative for variable-width types.
    pub fn type_size(&self) -> i16 {
        self.type_size
    }

    pub fn type_modifier(&self) -> i32 {
        self.type_modifier
    }

    pub fn format(&self) -> PgFormat {
        self.format
    }
}

impl From<FieldDescription> for Column {
    fn from(f: FieldDescription) -> Self {
        Self {
            name: f.name,
            table_oid: f.table_oid,
            column_id: f.column_id,
            type_oid: f.type_oid,
            type_size: f.type_size,
            type_modifier: f.type_modifier,
            format: f.format,
        }
    }
}

/// Outcome of a command.
///
/// Values are stored row-major, each either present with explicit length
/// (possibly zero) or NULL. Out of range index returns `None`.
pub struct PgResult {
    status: ExecStatus,
    columns: Arc<[Column]>,
    param_types: Vec<Oid>,
    values: Vec<Option<Bytes>>,
    ntuples: usize,
    cmd_status: ByteStr,
    error: Option<DbError>,
    error_message: String,
}

impl PgResult {
    /// Create an empty result with given status, without contacting the server.
    pub fn empty(status: ExecStatus) -> PgResult {
        PgResult {
            status,
            columns: Vec::new().into(),
            param_types: vec![],
            values: vec![],
            ntuples: 0,
            cmd_status: ByteStr::default(),
            error: None,
            error_message: String::new(),
        }
    }

    pub(crate) fn error(error: DbError) -> PgResult {
        let status = match error.severity_nonlocalized().unwrap_or(error.severity()) {
            "ERROR" | "FATAL" | "PANIC" => ExecStatus::FatalError,
            _ => ExecStatus::NonfatalError,
        };
        PgResult {
            error_message: error.to_string(),
            error: Some(error),
            ..PgResult::empty(status)
        }
    }

    /// Result status.
    pub fn status(&self) -> ExecStatus {
        self.status
    }

    /// Result status as conventional name, e.g. `PGRES_TUPLES_OK`.
    pub fn res_status(&self) -> &'static str {
        self.status.as_str()
    }

    /// Error message, empty if the result is not an error.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Individual error field, see [`DbError`] constants for field codes.
    pub fn error_field(&self, code: u8) -> Option<&str> {
        self.error.as_ref()?.field(code)
    }

    pub fn db_error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    /// Whether status is not an error.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Convert error result into [`Err`].
    pub fn check(self) -> Result<PgResult> {
        match self.is_success() {
            true => Ok(self),
            false => Err(self.into()),
        }
    }

    /// Release the result.
    ///
    /// The result is consumed, thus can not be accessed afterwards.
    pub fn clear(self) { }

    /// Number of rows.
    pub fn ntuples(&self) -> usize {
        self.ntuples
    }

    /// Number of columns.
    pub fn nfields(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, col: usize) -> Option<&Column> {
        self.columns.get(col)
    }

    /// Column name.
    pub fn fname(&self, col: usize) -> Option<&str> {
        self.column(col).map(Column::name)
    }

    /// Column index for the given name.
    ///
    /// Unquoted name is compared case-insensitively, a double quoted name is
    /// compared exactly.
    pub fn fnumber(&self, name: &str) -> Option<usize> {
        match name.strip_prefix('"').and_then(|e| e.strip_suffix('"')) {
            Some(quoted) => {
                let quoted = quoted.replace("\"\"", "\"");
                self.columns.iter().position(|c| c.name() == quoted)
            },
            None => self.columns.iter().position(|c| c.name().eq_ignore_ascii_case(name)),
        }
    }

    /// Oid of the table the column was fetched from.
    pub fn ftable(&self, col: usize) -> Option<Oid> {
        self.column(col).map(Column::table_oid)
    }

    /// Column number within its table.
    pub fn ftablecol(&self, col: usize) -> Option<i16> {
        self.column(col).map(Column::column_id)
    }

    pub fn fformat(&self, col: usize) -> Option<PgFormat> {
        self.column(col).map(Column::format)
    }

    pub fn ftype(&self, col: usize) -> Option<Oid> {
        self.column(col).map(Column::type_oid)
    }

    pub fn fmod(&self, col: usize) -> Option<i32> {
        self.column(col).map(Column::type_modifier)
    }

    pub fn fsize(&self, col: usize) -> Option<i16> {
        self.column(col).map(Column::type_size)
    }

    fn slot(&self, row: usize, col: usize) -> Option<&Option<Bytes>> {
        if row >= self.ntuples || col >= self.columns.len() {
            return None;
        }
        self.values.get(row * self.columns.len() + col)
    }

    /// Value bytes, `None` for NULL or out of range.
    pub fn get_value(&self, row: usize, col: usize) -> Option<&[u8]> {
        self.slot(row, col)?.as_deref()
    }

    /// Value as str, `None` for NULL, out of range or invalid utf8.
    pub fn get_str(&self, row: usize, col: usize) -> Option<&str> {
        std::str::from_utf8(self.get_value(row, col)?).ok()
    }

    /// Whether value is NULL, out of range is not NULL.
    pub fn get_is_null(&self, row: usize, col: usize) -> bool {
        matches!(self.slot(row, col), Some(None))
    }

    /// Value length in bytes, zero for NULL or out of range.
    pub fn get_length(&self, row: usize, col: usize) -> usize {
        self.get_value(row, col).map(<[u8]>::len).unwrap_or(0)
    }

    /// Number of parameters of a described prepared statement.
    pub fn nparams(&self) -> usize {
        self.param_types.len()
    }

    /// Parameter type of a described prepared statement.
    pub fn param_type(&self, index: usize) -> Option<Oid> {
        self.param_types.get(index).copied()
    }

    /// The command tag, e.g. `INSERT 0 1`.
    pub fn cmd_status(&self) -> &str {
        &self.cmd_status
    }

    /// Number of rows affected by the command.
    ///
    /// Returns `None` for command which does not report a row count.
    pub fn cmd_tuples(&self) -> Option<u64> {
        let mut words = self.cmd_status.split(' ');
        let count = match words.next()? {
            "INSERT" => words.nth(1)?,
            "SELECT" | "DELETE" | "UPDATE" | "MOVE" | "FETCH" | "COPY" | "MERGE" => words.next()?,
            _ => return None,
        };
        count.parse().ok()
    }

    /// Oid of the inserted row, for single row `INSERT` into table with oids.
    pub fn oid_value(&self) -> Option<Oid> {
        let oid = self.cmd_status.strip_prefix("INSERT ")?.split(' ').next()?.parse().ok()?;
        (oid != INVALID_OID).then_some(oid)
    }

    /// Column names.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    pub fn row(&self, row: usize) -> Option<Row<'_>> {
        (row < self.ntuples).then_some(Row { result: self, row })
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> {
        (0..self.ntuples).map(|row| Row { result: self, row })
    }

    /// All values, row by row.
    pub fn values(&self) -> Vec<Vec<Option<&[u8]>>> {
        self.rows().map(|row| row.values().collect()).collect()
    }

    /// All values of a column.
    pub fn column_values(&self, col: usize) -> Option<Vec<Option<&[u8]>>> {
        if col >= self.nfields() {
            return None;
        }
        Some(self.rows().map(|row| row.get(col)).collect())
    }

    /// All values of a column, by name.
    pub fn field_values(&self, name: &str) -> Option<Vec<Option<&[u8]>>> {
        self.column_values(self.fnumber(name)?)
    }
}

impl fmt::Debug for PgResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("PgResult");
        f.field("status", &self.status);
        f.field("ntuples", &self.ntuples);
        f.field("nfields", &self.columns.len());
        if !self.cmd_status.is_empty() {
            f.field("cmd_status", &self.cmd_status);
        }
        if let Some(error) = &self.error {
            f.field("error", error);
        }
        f.finish()
    }
}

/// Borrowed row of a [`PgResult`].
#[derive(Clone, Copy)]
pub struct Row<'a> {
    result: &'a PgResult,
    row: usize,
}

impl<'a> Row<'a> {
    /// Value of the column, `None` for NULL or out of range.
    pub fn get(&self, col: usize) -> Option<&'a [u8]> {
        self.result.get_value(self.row, col)
    }

    pub fn get_str(&self, col: usize) -> Option<&'a str> {
        self.result.get_str(self.row, col)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&'a [u8]> {
        self.get(self.result.fnumber(name)?)
    }

    pub fn is_null(&self, col: usize) -> bool {
        self.result.get_is_null(self.row, col)
    }

    pub fn len(&self) -> usize {
        self.result.nfields()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&'a [u8]>> {
        let me = *self;
        (0..self.len()).map(move |col| me.get(col))
    }

    /// Pairs of column name and value.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, Option<&'a [u8]>)> {
        self.result.fields().zip(self.values())
    }
}

impl fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.iter() {
            map.entry(&name, &value.map(String::from_utf8_lossy));
        }
        map.finish()
    }
}

/// Accumulate messages of a command into [`PgResult`].
#[derive(Debug)]
pub(crate) struct ResultBuilder {
    columns: Arc<[Column]>,
    param_types: Vec<Oid>,
    values: Vec<Option<Bytes>>,
    ntuples: usize,
    has_description: bool,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self {
            columns: Vec::new().into(),
            param_types: vec![],
            values: vec![],
            ntuples: 0,
            has_description: false,
        }
    }

    pub fn set_columns(&mut self, fields: Vec<FieldDescription>) {
        self.columns = fields.into_iter().map(Column::from).collect();
        self.has_description = true;
    }

    pub fn set_param_types(&mut self, oids: Vec<Oid>) {
        self.param_types = oids;
    }

    pub fn has_description(&self) -> bool {
        self.has_description
    }

    pub fn ntuples(&self) -> usize {
        self.ntuples
    }

    fn check_row(&self, row: &DataRow) -> Result<(), ProtocolError> {
        if !self.has_description {
            return Err(ProtocolError::malformed(DataRow::MSGTYPE, "row without description"));
        }
        if row.values.len() != self.columns.len() {
            return Err(ProtocolError::malformed(DataRow::MSGTYPE, "value count differ from column count"));
        }
        Ok(())
    }

    pub fn add_row(&mut self, row: DataRow) -> Result<(), ProtocolError> {
        self.check_row(&row)?;
        self.values.extend(row.values);
        self.ntuples += 1;
        Ok(())
    }

    /// Build a single row result, rows are not accumulated.
    pub fn single_row(&self, row: DataRow) -> Result<PgResult, ProtocolError> {
        self.check_row(&row)?;
        Ok(PgResult {
            columns: self.columns.clone(),
            values: row.values,
            ntuples: 1,
            ..PgResult::empty(ExecStatus::SingleTuple)
        })
    }

    pub fn finish(self, status: ExecStatus, cmd_status: Option<ByteStr>) -> PgResult {
        PgResult {
            columns: self.columns,
            param_types: self.param_types,
            values: self.values,
            ntuples: self.ntuples,
            cmd_status: cmd_status.unwrap_or_default(),
            ..PgResult::empty(status)
        }
    }

    /// Result announcing a COPY state, columns only carry their format.
    pub fn copy(status: ExecStatus, formats: Vec<PgFormat>) -> PgResult {
        let columns = formats
            .into_iter()
            .map(|format| Column {
                name: ByteStr::default(),
                table_oid: 0,
                column_id: 0,
                type_oid: 0,
                type_size: 0,
                type_modifier: 0,
                format,
            })
            .collect();
        PgResult { columns, ..PgResult::empty(status) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn field(name: &'static str, type_oid: Oid) -> FieldDescription {
        FieldDescription {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: PgFormat::Text,
        }
    }

    fn row(values: &[Option<&'static [u8]>]) -> DataRow {
        DataRow { values: values.iter().map(|v| v.map(Bytes::from_static)).collect() }
    }

    fn sample() -> PgResult {
        let mut builder = ResultBuilder::new();
        builder.set_columns(vec![field("id", 23), field("Name", 25)]);
        builder.add_row(row(&[Some(b"1"), Some(b"")])).unwrap();
        builder.add_row(row(&[Some(b"2"), None])).unwrap();
        builder.finish(ExecStatus::TuplesOk, Some("SELECT 2".into()))
    }

    #[test]
    fn null_and_empty() {
        let res = sample();
        assert_eq!(res.ntuples(), 2);
        assert_eq!(res.nfields(), 2);
        assert_eq!(res.get_value(0, 1), Some(&b""[..]));
        assert!(!res.get_is_null(0, 1));
        assert_eq!(res.get_length(0, 1), 0);
        assert_eq!(res.get_value(1, 1), None);
        assert!(res.get_is_null(1, 1));
        assert!(!res.get_is_null(5, 1));
        assert_eq!(res.get_str(1, 0), Some("2"));
    }

    #[test]
    fn field_lookup() {
        let res = sample();
        assert_eq!(res.fname(1), Some("Name"));
        assert_eq!(res.fnumber("name"), Some(1));
        assert_eq!(res.fnumber("\"Name\""), Some(1));
        assert_eq!(res.fnumber("\"name\""), None);
        assert_eq!(res.ftype(0), Some(23));
        assert_eq!(res.fname(2), None);
        assert_eq!(res.field_values("id"), Some(vec![Some(&b"1"[..]), Some(&b"2"[..])]));
        assert_eq!(res.fields().collect::<Vec<_>>(), ["id", "Name"]);
    }

    #[test]
    fn rows_view() {
        let res = sample();
        let rows = res.rows().collect::<Vec<_>>();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_by_name("ID"), Some(&b"1"[..]));
        assert!(rows[1].is_null(1));
        assert_eq!(res.values()[1], vec![Some(&b"2"[..]), None]);
    }

    #[test]
    fn row_count_mismatch() {
        let mut builder = ResultBuilder::new();
        builder.set_columns(vec![field("id", 23)]);
        assert!(builder.add_row(row(&[Some(b"1"), Some(b"2")])).is_err());
    }

    #[test]
    fn command_tag() {
        let res = ResultBuilder::new().finish(ExecStatus::CommandOk, Some("INSERT 0 3".into()));
        assert_eq!(res.cmd_tuples(), Some(3));
        assert_eq!(res.oid_value(), None);

        let res = ResultBuilder::new().finish(ExecStatus::CommandOk, Some("INSERT 16384 1".into()));
        assert_eq!(res.oid_value(), Some(16384));

        let res = ResultBuilder::new().finish(ExecStatus::CommandOk, Some("COPY 3".into()));
        assert_eq!(res.cmd_tuples(), Some(3));

        let res = ResultBuilder::new().finish(ExecStatus::CommandOk, Some("CREATE TABLE".into()));
        assert_eq!(res.cmd_tuples(), None);
    }

    #[test]
    fn error_result() {
        let res = PgResult::error(DbError::client("ERROR", "boom"));
        assert_eq!(res.status(), ExecStatus::FatalError);
        assert_eq!(res.error_message(), "ERROR:  boom");
        assert_eq!(res.error_field(DbError::MESSAGE), Some("boom"));
        assert!(res.check().is_err());
        assert!(PgResult::empty(ExecStatus::EmptyQuery).check().is_ok());
    }
}
