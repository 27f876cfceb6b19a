//! 表格存储 - 基础设施层
//!
//! 持有一个 CSV 文件的内存副本，所有读写都经过同一把锁。
//! 每次修改先写入 `<文件>.tmp`，再原子地替换原文件。
//! 没有改动的行按读入时的原始字节写回，行尾（LF/CRLF）和引号风格保持不变。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use csv::Terminator;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::models::schema::{
    parse_slot_column, SOURCE_ALIASES, SOURCE_COLUMN, TAGS_COLUMN, TRANSLATION_ALIASES,
    TRANSLATION_COLUMN,
};
use crate::models::{GenerationResult, QaKey, QaPayload, Record, RowSummary, SlotSchema};

const UTF8_BOM: &str = "\u{feff}";
const SOURCE_PREVIEW_CHARS: usize = 120;
const TRANSLATION_PREVIEW_CHARS: usize = 240;

/// 内存中的表格
#[derive(Debug, Clone, Default)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// 读入时表头的原始字节（含行尾），表头改动后为 None
    raw_header: Option<Vec<u8>>,
    /// 读入时每行的原始字节（含行尾），改动过的行为 None
    raw_rows: Vec<Option<Vec<u8>>>,
    /// 原文件使用 CRLF 行尾
    crlf: bool,
}

impl Table {
    fn with_default_headers() -> Self {
        Self {
            headers: vec![
                SOURCE_COLUMN.to_string(),
                TRANSLATION_COLUMN.to_string(),
                TAGS_COLUMN.to_string(),
            ],
            ..Self::default()
        }
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn column_any(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| self.column(alias))
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.forget_raw();
        self.headers.len() - 1
    }

    /// 列结构变化后，所有行都要重新编码
    fn forget_raw(&mut self) {
        self.raw_header = None;
        self.raw_rows.iter_mut().for_each(|raw| *raw = None);
    }

    fn set_cell(&mut self, row: usize, col: usize, value: String) {
        if self.rows[row][col] != value {
            self.rows[row][col] = value;
            if let Some(raw) = self.raw_rows.get_mut(row) {
                *raw = None;
            }
        }
    }

    /// 应用槽位模式迁移，返回新增的列
    fn apply_schema(&mut self, schema: SlotSchema) -> Vec<String> {
        let added = schema.widen(&mut self.headers);
        if !added.is_empty() {
            let width = self.headers.len();
            for row in &mut self.rows {
                row.resize(width, String::new());
            }
            self.forget_raw();
        }
        added
    }

    fn qa_column_indices(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| parse_slot_column(h).is_some())
            .map(|(idx, _)| idx)
            .collect()
    }

    fn cell(&self, row: usize, col: Option<usize>) -> &str {
        col.and_then(|c| self.rows.get(row)?.get(c))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn has_qa(&self, row: usize) -> bool {
        self.qa_column_indices()
            .into_iter()
            .any(|col| !self.cell(row, Some(col)).trim().is_empty())
    }

    fn record(&self, idx: usize) -> Record {
        let schema = SlotSchema::from_headers(&self.headers);
        let mut qa = GenerationResult::empty();
        for key in QaKey::ALL {
            let values = (1..=schema.version())
                .map(|pos| self.cell(idx, self.column(&key.column(pos))).to_string())
                .collect();
            qa.set(key, values);
        }
        Record {
            id: idx,
            source: self.cell(idx, self.column_any(SOURCE_ALIASES)).to_string(),
            translation: self.cell(idx, self.column_any(TRANSLATION_ALIASES)).to_string(),
            tags: self.cell(idx, self.column(TAGS_COLUMN)).to_string(),
            qa,
        }
    }
}

/// 单个 CSV 文件的存储
///
/// 职责：
/// - 持有文件内容和唯一的锁
/// - 按行号读取、筛选、写入问答
/// - 不认识批次和生成服务
pub struct TableStore {
    path: PathBuf,
    table: Mutex<Table>,
}

impl TableStore {
    /// 打开文件；文件不存在时得到一个空表
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let table = load_table(&path)?;
        debug!(
            "打开表格 {}: {} 行, {} 列",
            path.display(),
            table.rows.len(),
            table.headers.len()
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// 重新从磁盘读取，丢弃内存中的副本
    pub fn reload(&self) -> StoreResult<()> {
        let mut table = self.table.lock()?;
        *table = load_table(&self.path)?;
        Ok(())
    }

    pub fn row_count(&self) -> StoreResult<usize> {
        Ok(self.table.lock()?.rows.len())
    }

    pub fn headers(&self) -> StoreResult<Vec<String>> {
        Ok(self.table.lock()?.headers.clone())
    }

    /// 当前表头对应的槽位模式
    pub fn slot_schema(&self) -> StoreResult<SlotSchema> {
        Ok(SlotSchema::from_headers(&self.table.lock()?.headers))
    }

    pub fn get_row(&self, idx: usize) -> StoreResult<Option<Record>> {
        let table = self.table.lock()?;
        Ok((idx < table.rows.len()).then(|| table.record(idx)))
    }

    /// 按子串筛选后分页，`id` 保留原始行号
    pub fn list_rows(&self, skip: usize, limit: usize, filter: &str) -> StoreResult<Vec<RowSummary>> {
        let table = self.table.lock()?;
        let source_col = table.column_any(SOURCE_ALIASES);
        let translation_col = table.column_any(TRANSLATION_ALIASES);
        let tags_col = table.column(TAGS_COLUMN);

        let rows = (0..table.rows.len())
            .filter(|&idx| {
                filter.is_empty()
                    || [source_col, translation_col, tags_col]
                        .into_iter()
                        .any(|col| table.cell(idx, col).contains(filter))
            })
            .skip(skip)
            .take(limit)
            .map(|idx| RowSummary {
                id: idx,
                source: preview(table.cell(idx, source_col), SOURCE_PREVIEW_CHARS),
                translation: preview(table.cell(idx, translation_col), TRANSLATION_PREVIEW_CHARS),
                tags: table.cell(idx, tags_col).to_string(),
            })
            .collect();
        Ok(rows)
    }

    pub fn list_all_rows(&self) -> StoreResult<Vec<Record>> {
        let table = self.table.lock()?;
        Ok((0..table.rows.len()).map(|idx| table.record(idx)).collect())
    }

    /// 该行是否已有任意非空的问答内容；行号越界时为 false
    pub fn has_existing_qa(&self, idx: usize) -> StoreResult<bool> {
        let table = self.table.lock()?;
        Ok(idx < table.rows.len() && table.has_qa(idx))
    }

    /// 已有问答内容的行数
    pub fn count_rows_with_qa(&self) -> StoreResult<usize> {
        let table = self.table.lock()?;
        Ok((0..table.rows.len()).filter(|&idx| table.has_qa(idx)).count())
    }

    /// 用新的问答覆盖一行，行号越界时返回 `Ok(false)`
    ///
    /// 先清空该行所有问答列，再写标签和各槽位；缺少的槽位列会先迁移出来
    pub fn update_row_with_qa(&self, idx: usize, payload: &QaPayload) -> StoreResult<bool> {
        let mut table = self.table.lock()?;
        if idx >= table.rows.len() {
            return Ok(false);
        }

        let mut next = table.clone();

        for col in next.qa_column_indices() {
            next.set_cell(idx, col, String::new());
        }

        if let Some(tags) = &payload.tags {
            let col = next.ensure_column(TAGS_COLUMN);
            next.set_cell(idx, col, tags.clone());
        }

        let added = next.apply_schema(SlotSchema::for_count(payload.qa.max_len()));
        if !added.is_empty() {
            debug!("新增槽位列: {}", added.join(", "));
        }

        for (key, values) in payload.qa.iter() {
            for (offset, value) in values.iter().enumerate() {
                let col = next.ensure_column(&key.column(offset + 1));
                next.set_cell(idx, col, value.clone());
            }
        }

        persist(&self.path, &next)?;
        *table = next;
        Ok(true)
    }

    /// 确保 1..=n 的槽位列都存在（只增不删）并写回文件
    pub fn ensure_headers(&self, n: usize) -> StoreResult<()> {
        let mut table = self.table.lock()?;
        let mut next = table.clone();
        let added = next.apply_schema(SlotSchema::for_count(n));
        persist(&self.path, &next)?;
        if !added.is_empty() {
            info!("✓ {} 新增 {} 个槽位列", self.path.display(), added.len());
        }
        *table = next;
        Ok(())
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn load_table(path: &Path) -> StoreResult<Table> {
    if !path.exists() {
        return Ok(Table::with_default_headers());
    }

    let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(&content);
    if content.trim().is_empty() {
        return Ok(Table::with_default_headers());
    }

    let bytes = content.as_bytes();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut starts = Vec::new();
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| StoreError::csv(path, e))?
    {
        starts.push(record.position().map_or(0, |pos| pos.byte() as usize));
        records.push(record.iter().map(str::to_string).collect());
    }
    let mut raw = raw_records(bytes, &starts).into_iter();
    let mut records = records.into_iter();

    let headers: Vec<String> = records
        .next()
        .unwrap_or_default()
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let raw_header = raw.next();

    let rows: Vec<Vec<String>> = records
        .map(|mut row| {
            row.resize(headers.len(), String::new());
            row
        })
        .collect();
    let raw_rows = raw.map(Some).collect();

    let table = Table {
        headers,
        rows,
        raw_header,
        raw_rows,
        crlf: content.contains("\r\n"),
    };
    if !table.rows.is_empty() {
        if table.column_any(SOURCE_ALIASES).is_none() {
            return Err(StoreError::MissingColumn {
                column: SOURCE_COLUMN.to_string(),
            });
        }
        if table.column_any(TRANSLATION_ALIASES).is_none() {
            return Err(StoreError::MissingColumn {
                column: TRANSLATION_COLUMN.to_string(),
            });
        }
    }
    Ok(table)
}

/// 按记录起点切分原始字节，每段以本记录的行尾结束
///
/// 记录起点前的换行字节归到上一段，空行跟随它前面的记录
fn raw_records(bytes: &[u8], starts: &[usize]) -> Vec<Vec<u8>> {
    let mut bounds: Vec<usize> = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            if i == 0 {
                return 0;
            }
            let breaks = bytes
                .get(start..)
                .unwrap_or_default()
                .iter()
                .take_while(|b| matches!(b, b'\r' | b'\n'))
                .count();
            start + breaks
        })
        .collect();
    bounds.push(bytes.len());

    bounds
        .windows(2)
        .map(|w| bytes.get(w[0]..w[1]).unwrap_or_default().to_vec())
        .collect()
}

/// 暂存文件路径：`<原文件>.tmp`
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

fn encode_record(fields: &[String], terminator: Terminator) -> csv::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(terminator)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// 先完整写入暂存文件，再原子替换原文件
fn persist(path: &Path, table: &Table) -> StoreResult<()> {
    let staged = staging_path(path);
    let terminator = if table.crlf {
        Terminator::CRLF
    } else {
        Terminator::Any(b'\n')
    };

    let file = File::create(&staged).map_err(|e| StoreError::staging(&staged, e))?;
    let mut buffered = BufWriter::new(file);
    buffered
        .write_all(UTF8_BOM.as_bytes())
        .map_err(|e| StoreError::staging(&staged, e))?;

    let header = match &table.raw_header {
        Some(raw) => raw.clone(),
        None => encode_record(&table.headers, terminator).map_err(|e| StoreError::csv(&staged, e))?,
    };
    buffered
        .write_all(&header)
        .map_err(|e| StoreError::staging(&staged, e))?;

    for (idx, row) in table.rows.iter().enumerate() {
        let encoded;
        let bytes = match table.raw_rows.get(idx).and_then(Option::as_ref) {
            Some(raw) => raw,
            None => {
                encoded = encode_record(row, terminator).map_err(|e| StoreError::csv(&staged, e))?;
                &encoded
            }
        };
        buffered
            .write_all(bytes)
            .map_err(|e| StoreError::staging(&staged, e))?;
    }

    let file = buffered
        .into_inner()
        .map_err(|e| StoreError::staging(&staged, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::staging(&staged, e))?;
    drop(file);

    std::fs::rename(&staged, path).map_err(|e| StoreError::staging(path, e))?;
    debug!("已写回 {} ({} 行)", path.display(), table.rows.len());
    Ok(())
}
