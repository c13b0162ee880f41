//! Product import from CSV/XLSX price lists.
//!
//! `run_import` is a single pass: read the table (format, encoding and
//! delimiter are detected), map the header, validate rows, assign product
//! ids and upsert products then inventory in bounded transactional chunks.
//! Row problems are collected into the report; only file-level problems
//! abort the import.

pub mod delimiter;
pub mod encoding;
pub mod rows;
pub mod xlsx;

use crate::db::{self, Pool, ProductUpsert};
use chrono::Utc;
use encoding::Encoding;
use rows::{parse_row, HeaderMap, ParsedRow, RowError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file is empty")]
    Empty,
    #[error("required columns missing: {0}")]
    MissingColumns(String),
    #[error("cannot read workbook: {0}")]
    Xlsx(String),
    #[error("cannot read delimited text: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl ImportError {
    /// Problems with the uploaded file itself, as opposed to storage failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ImportError::Database(_) | ImportError::Sql(_))
    }
}

/// One table row with its 1-based line number in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub line: usize,
    pub cells: Vec<String>,
}

impl TableRow {
    pub fn blank(line: usize) -> Self {
        Self {
            line,
            cells: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Csv,
    Xlsx,
}

#[derive(Debug)]
pub struct Table {
    pub format: Format,
    pub encoding: Option<Encoding>,
    pub delimiter: Option<u8>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub format: Format,
    pub encoding: Option<Encoding>,
    pub delimiter: Option<String>,
    /// Non-blank data rows.
    pub total_rows: usize,
    pub valid_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub inventory_rows: usize,
    /// Blank rows.
    pub skipped: usize,
    pub errors: Vec<RowError>,
    pub dry_run: bool,
}

impl ImportReport {
    /// Plain-text summary for chat replies and the CLI. At most
    /// `max_errors` row errors are listed.
    pub fn summary(&self, max_errors: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}{} rows: {} valid, {} with errors",
            if self.dry_run { "Dry run. " } else { "" },
            self.total_rows,
            self.valid_rows,
            self.errors.len()
        );
        let _ = writeln!(
            out,
            "Products created: {}, updated: {}; inventory rows: {}",
            self.created, self.updated, self.inventory_rows
        );
        for err in self.errors.iter().take(max_errors) {
            let _ = writeln!(out, "line {}: {}", err.line, err.message);
        }
        if self.errors.len() > max_errors {
            let _ = writeln!(out, "… and {} more", self.errors.len() - max_errors);
        }
        out.trim_end().to_string()
    }
}

/// Read the raw upload into rows. XLSX is recognised by the ZIP magic or
/// the file name; everything else is delimited text.
pub async fn read_table(bytes: Vec<u8>, file_name: Option<&str>) -> Result<Table, ImportError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ImportError::Empty);
    }
    let named_xlsx = file_name
        .map(|n| n.to_ascii_lowercase().ends_with(".xlsx"))
        .unwrap_or(false);
    if xlsx::looks_like_zip(&bytes) || named_xlsx {
        let rows = xlsx::read_first_sheet(bytes).await?;
        return Ok(Table {
            format: Format::Xlsx,
            encoding: None,
            delimiter: None,
            rows,
        });
    }

    let (text, enc) = encoding::decode(&bytes);
    let delim = delimiter::sniff(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut lines = LineCounter::new(text.as_bytes());
    let mut rows = Vec::new();
    let mut next_line = 1;
    for record in reader.records() {
        let record = record?;
        let line = lines.line_at(record.position().map_or(0, |p| p.byte() as usize));
        // The reader drops empty lines; put them back as blank rows.
        rows.extend((next_line..line).map(TableRow::blank));
        next_line = line + 1 + record.iter().map(|f| f.matches('\n').count()).sum::<usize>();
        rows.push(TableRow {
            line,
            cells: record.iter().map(str::to_string).collect(),
        });
    }
    Ok(Table {
        format: Format::Csv,
        encoding: Some(enc),
        delimiter: Some(delim),
        rows,
    })
}

/// Maps record byte offsets to 1-based line numbers. A record's reported
/// offset may precede the blank lines the reader skipped, so leading line
/// breaks are stepped over. Offsets must be non-decreasing.
struct LineCounter<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0, line: 1 }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let mut offset = offset.min(self.bytes.len());
        while offset < self.bytes.len() && matches!(self.bytes[offset], b'\r' | b'\n') {
            offset += 1;
        }
        if offset > self.pos {
            self.line += self.bytes[self.pos..offset].iter().filter(|&&b| b == b'\n').count();
            self.pos = offset;
        }
        self.line
    }
}

/// Which column a derived product id comes from. An `id` of `A` and a
/// sku of `A` name different products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKey {
    Id,
    Sku,
}

/// Deterministic id for a product key, so re-imports hit the same row.
pub fn product_uuid(kind: ProductKey, key: &str) -> Uuid {
    let kind = match kind {
        ProductKey::Id => "id",
        ProductKey::Sku => "sku",
    };
    let name = format!("tg-storefront:product:{kind}:{}", key.trim());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
}

/// Assigns product ids: a valid UUID in `id`, then a known sku, then a
/// UUIDv5 of `id` or else `sku`, then a random UUIDv4.
struct IdResolver {
    by_sku: HashMap<String, String>,
}

impl IdResolver {
    fn resolve(&mut self, row: &ParsedRow) -> Result<String, String> {
        let explicit = row
            .id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .map(|u| u.hyphenated().to_string());
        let known = row.sku.as_ref().and_then(|s| self.by_sku.get(s)).cloned();

        let id = match (explicit, known) {
            (Some(id), Some(owner)) if id != owner => {
                return Err(format!(
                    "sku {:?} already belongs to product {owner}",
                    row.sku.as_deref().unwrap_or_default()
                ));
            }
            (Some(id), _) => id,
            (None, Some(owner)) => owner,
            (None, None) => match (row.id.as_deref(), row.sku.as_deref()) {
                (Some(id), _) => product_uuid(ProductKey::Id, id).to_string(),
                (None, Some(sku)) => product_uuid(ProductKey::Sku, sku).to_string(),
                (None, None) => Uuid::new_v4().to_string(),
            },
        };
        if let Some(sku) = &row.sku {
            self.by_sku.insert(sku.clone(), id.clone());
        }
        Ok(id)
    }
}

#[derive(Debug, Clone)]
struct InventoryWrite {
    line: usize,
    city: String,
    product_id: String,
    city_id: i64,
    stock: Option<i64>,
    price: Option<i64>,
}

/// Validated, de-duplicated writes. Later rows replace earlier ones with
/// the same key but keep the first row's position.
#[derive(Default)]
struct Plan {
    products: Vec<ProductUpsert>,
    product_pos: HashMap<String, usize>,
    inventory: Vec<InventoryWrite>,
    inventory_pos: HashMap<(String, i64), usize>,
}

impl Plan {
    fn push_product(&mut self, p: ProductUpsert) {
        match self.product_pos.get(&p.id) {
            Some(&idx) => self.products[idx] = p,
            None => {
                self.product_pos.insert(p.id.clone(), self.products.len());
                self.products.push(p);
            }
        }
    }

    fn push_inventory(&mut self, w: InventoryWrite) {
        let key = (w.product_id.clone(), w.city_id);
        match self.inventory_pos.get(&key) {
            Some(&idx) => self.inventory[idx] = w,
            None => {
                self.inventory_pos.insert(key, self.inventory.len());
                self.inventory.push(w);
            }
        }
    }
}

#[instrument(skip_all, fields(file = file_name.unwrap_or("-"), dry_run = opts.dry_run))]
pub async fn run_import(
    pool: &Pool,
    bytes: Vec<u8>,
    file_name: Option<&str>,
    opts: &ImportOptions,
) -> Result<ImportReport, ImportError> {
    let table = read_table(bytes, file_name).await?;
    let mut report = ImportReport {
        format: table.format,
        encoding: table.encoding,
        delimiter: table.delimiter.map(|d| (d as char).to_string()),
        total_rows: 0,
        valid_rows: 0,
        created: 0,
        updated: 0,
        inventory_rows: 0,
        skipped: 0,
        errors: Vec::new(),
        dry_run: opts.dry_run,
    };

    let mut rows = table
        .rows
        .into_iter()
        .skip_while(|r| r.cells.iter().all(|c| c.trim().is_empty()));
    let header_row = rows.next().ok_or(ImportError::Empty)?;
    let header = HeaderMap::from_header(&header_row.cells)?;

    let cities: HashMap<String, i64> = db::list_cities(pool, true)
        .await?
        .into_iter()
        .map(|c| (c.name.trim().to_lowercase(), c.id))
        .collect();
    let mut ids = IdResolver {
        by_sku: db::product_ids_by_sku(pool).await?,
    };

    let mut plan = Plan::default();
    for row in rows {
        let parsed = match parse_row(&header, &row) {
            Ok(Some(p)) => p,
            Ok(None) => {
                report.skipped += 1;
                continue;
            }
            Err(err) => {
                report.total_rows += 1;
                report.errors.push(err);
                continue;
            }
        };
        report.total_rows += 1;

        let city_id = match parsed.city.as_deref() {
            Some(name) => match cities.get(&name.to_lowercase()) {
                Some(&id) => Some(id),
                None => {
                    report.errors.push(RowError {
                        line: parsed.line,
                        message: format!("unknown city {name:?}"),
                    });
                    continue;
                }
            },
            None => None,
        };
        let product_id = match ids.resolve(&parsed) {
            Ok(id) => id,
            Err(message) => {
                report.errors.push(RowError {
                    line: parsed.line,
                    message,
                });
                continue;
            }
        };

        report.valid_rows += 1;
        if let Some(city_id) = city_id {
            if parsed.stock.is_some() || parsed.city_price.is_some() {
                plan.push_inventory(InventoryWrite {
                    line: parsed.line,
                    city: parsed.city.clone().unwrap_or_default(),
                    product_id: product_id.clone(),
                    city_id,
                    stock: parsed.stock,
                    price: parsed.city_price,
                });
            }
        }
        plan.push_product(ProductUpsert {
            id: product_id,
            sku: parsed.sku,
            title: parsed.title,
            description: parsed.description,
            category: parsed.category,
            price: parsed.price,
            is_active: parsed.is_active,
            image_url: parsed.image_url,
        });
    }

    write_plan(pool, &plan, opts, &mut report).await?;
    report.errors.sort_by_key(|e| e.line);
    info!(
        total = report.total_rows,
        valid = report.valid_rows,
        created = report.created,
        updated = report.updated,
        inventory = report.inventory_rows,
        errors = report.errors.len(),
        "import finished"
    );
    Ok(report)
}

/// Products go first so inventory rows always find their product. A dry
/// run performs the same writes in one transaction and rolls it back.
async fn write_plan(
    pool: &Pool,
    plan: &Plan,
    opts: &ImportOptions,
    report: &mut ImportReport,
) -> Result<(), ImportError> {
    let now = Utc::now();
    let batch = opts.batch_size.max(1);

    if opts.dry_run {
        let mut tx = pool.begin().await?;
        for p in &plan.products {
            if db::upsert_product(&mut *tx, p, now).await? {
                report.created += 1;
            } else {
                report.updated += 1;
            }
        }
        for w in &plan.inventory {
            let written = db::merge_inventory(&mut *tx, &w.product_id, w.city_id, w.stock, w.price, now).await?;
            report.record_inventory(w, written);
        }
        tx.rollback().await?;
        return Ok(());
    }

    for chunk in plan.products.chunks(batch) {
        let mut tx = pool.begin().await?;
        for p in chunk {
            if db::upsert_product(&mut *tx, p, now).await? {
                report.created += 1;
            } else {
                report.updated += 1;
            }
        }
        tx.commit().await?;
    }
    for chunk in plan.inventory.chunks(batch) {
        let mut tx = pool.begin().await?;
        let mut written = Vec::with_capacity(chunk.len());
        for w in chunk {
            written.push(db::merge_inventory(&mut *tx, &w.product_id, w.city_id, w.stock, w.price, now).await?);
        }
        tx.commit().await?;
        for (w, written) in chunk.iter().zip(written) {
            report.record_inventory(w, written);
        }
    }
    Ok(())
}

impl ImportReport {
    /// A city price without stock only updates an existing inventory row;
    /// when there is none the row is reported instead of stocked at zero.
    fn record_inventory(&mut self, w: &InventoryWrite, written: bool) {
        if written {
            self.inventory_rows += 1;
        } else {
            self.errors.push(RowError {
                line: w.line,
                message: format!("city_price: no stock recorded in {} yet, add a stock value", w.city),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(id: Option<&str>, sku: Option<&str>) -> ParsedRow {
        ParsedRow {
            line: 2,
            id: id.map(str::to_string),
            sku: sku.map(str::to_string),
            title: "Tea".into(),
            price: 100,
            is_active: true,
            image_url: None,
            description: None,
            category: None,
            city: None,
            stock: None,
            city_price: None,
        }
    }

    #[test]
    fn ids_follow_resolution_order() {
        let mut ids = IdResolver {
            by_sku: HashMap::from([("OLD".to_string(), "existing-id".to_string())]),
        };
        let uuid = "6F9619FF-8B86-D011-B42D-00C04FC964FF";
        assert_eq!(
            ids.resolve(&parsed(Some(uuid), None)).unwrap(),
            "6f9619ff-8b86-d011-b42d-00c04fc964ff"
        );
        assert_eq!(ids.resolve(&parsed(Some("42"), Some("OLD"))).unwrap(), "existing-id");
        assert_eq!(
            ids.resolve(&parsed(Some("42"), None)).unwrap(),
            product_uuid(ProductKey::Id, "42").to_string()
        );
        assert_eq!(
            ids.resolve(&parsed(None, Some("NEW"))).unwrap(),
            product_uuid(ProductKey::Sku, "NEW").to_string()
        );
        // the sku now maps to the id just assigned
        assert_eq!(
            ids.resolve(&parsed(Some("other"), Some("NEW"))).unwrap(),
            product_uuid(ProductKey::Sku, "NEW").to_string()
        );
        let random = ids.resolve(&parsed(None, None)).unwrap();
        assert_eq!(Uuid::parse_str(&random).unwrap().get_version_num(), 4);
    }

    #[test]
    fn explicit_uuid_conflicting_with_sku_is_rejected() {
        let mut ids = IdResolver {
            by_sku: HashMap::from([("OLD".to_string(), "existing-id".to_string())]),
        };
        let err = ids
            .resolve(&parsed(Some("6f9619ff-8b86-d011-b42d-00c04fc964ff"), Some("OLD")))
            .unwrap_err();
        assert!(err.contains("already belongs"));
    }

    #[test]
    fn v5_ids_are_stable() {
        let sku = |key| product_uuid(ProductKey::Sku, key);
        assert_eq!(sku("T-1"), sku(" T-1 "));
        assert_ne!(sku("T-1"), sku("T-2"));
        assert_eq!(sku("T-1").get_version_num(), 5);
    }

    #[test]
    fn id_and_sku_keys_do_not_collide() {
        assert_ne!(product_uuid(ProductKey::Id, "A"), product_uuid(ProductKey::Sku, "A"));

        let mut ids = IdResolver {
            by_sku: HashMap::new(),
        };
        let by_id = ids.resolve(&parsed(Some("A"), None)).unwrap();
        let by_sku = ids.resolve(&parsed(None, Some("A"))).unwrap();
        assert_ne!(by_id, by_sku);
    }

    #[tokio::test]
    async fn csv_rows_keep_source_line_numbers() {
        let text = "title;price\n\nTea;\"1,50\"\n\"Multi\nline\";2\nCoffee;3\n";
        let table = read_table(text.as_bytes().to_vec(), Some("list.csv")).await.unwrap();
        assert_eq!(table.format, Format::Csv);
        assert_eq!(table.delimiter, Some(b';'));
        assert_eq!(table.encoding, Some(Encoding::Utf8));
        let lines: Vec<usize> = table.rows.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 4, 6]);
        assert_eq!(table.rows[1], TableRow::blank(2));
        assert_eq!(table.rows[3].cells, vec!["Multi\nline", "2"]);
    }

    #[tokio::test]
    async fn whitespace_only_file_is_empty() {
        let err = read_table(b" \r\n ".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, ImportError::Empty));
    }

    #[test]
    fn summary_truncates_errors() {
        let report = ImportReport {
            format: Format::Csv,
            encoding: Some(Encoding::Utf8),
            delimiter: Some(";".into()),
            total_rows: 3,
            valid_rows: 1,
            created: 1,
            updated: 0,
            inventory_rows: 0,
            skipped: 0,
            errors: vec![
                RowError { line: 2, message: "title is empty".into() },
                RowError { line: 3, message: "price: price is empty".into() },
            ],
            dry_run: false,
        };
        let text = report.summary(1);
        assert!(text.contains("3 rows: 1 valid, 2 with errors"));
        assert!(text.contains("line 2: title is empty"));
        assert!(!text.contains("line 3"));
        assert!(text.ends_with("… and 1 more"));
    }
}
