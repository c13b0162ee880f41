//! Header mapping and per-row validation.
use super::{ImportError, TableRow};
use crate::price::parse_price;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Sku,
    Title,
    Price,
    Active,
    Image,
    Description,
    Category,
    City,
    Stock,
    CityPrice,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Sku => "sku",
            Column::Title => "title",
            Column::Price => "price",
            Column::Active => "active",
            Column::Image => "image",
            Column::Description => "description",
            Column::Category => "category",
            Column::City => "city",
            Column::Stock => "stock",
            Column::CityPrice => "city_price",
        }
    }

    /// Match a header cell. Case, surrounding spaces and inner
    /// spaces/dashes are ignored.
    pub fn from_header(raw: &str) -> Option<Column> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        let col = match key.as_str() {
            "id" | "uuid" => Column::Id,
            "sku" | "артикул" => Column::Sku,
            "title" | "name" | "название" | "наименование" => Column::Title,
            "price" | "цена" => Column::Price,
            "active" | "is_active" | "активен" => Column::Active,
            "image" | "image_url" | "photo" | "фото" => Column::Image,
            "description" | "описание" => Column::Description,
            "category" | "категория" => Column::Category,
            "city" | "город" => Column::City,
            "stock" | "остаток" | "количество" => Column::Stock,
            "city_price" | "цена_город" => Column::CityPrice,
            _ => return None,
        };
        Some(col)
    }
}

/// Column positions found in the header row. The first occurrence of a
/// column wins; unknown headers are ignored.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    positions: HashMap<Column, usize>,
}

impl HeaderMap {
    pub fn from_header(cells: &[String]) -> Result<Self, ImportError> {
        let mut positions = HashMap::new();
        for (idx, cell) in cells.iter().enumerate() {
            if let Some(col) = Column::from_header(cell) {
                positions.entry(col).or_insert(idx);
            }
        }
        let missing: Vec<&'static str> = [Column::Title, Column::Price]
            .into_iter()
            .filter(|c| !positions.contains_key(c))
            .map(|c| c.name())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing.join(", ")));
        }
        Ok(Self { positions })
    }

    pub fn has(&self, col: Column) -> bool {
        self.positions.contains_key(&col)
    }

    /// Trimmed cell value; `None` when the column is absent or the cell empty.
    fn get<'a>(&self, row: &'a TableRow, col: Column) -> Option<&'a str> {
        let idx = *self.positions.get(&col)?;
        row.cells
            .get(idx)
            .map(|s| s.trim_matches(|c: char| c.is_whitespace()))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// A validated data row, before product ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow {
    pub line: usize,
    pub id: Option<String>,
    pub sku: Option<String>,
    pub title: String,
    pub price: i64,
    pub is_active: bool,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub city: Option<String>,
    pub stock: Option<i64>,
    pub city_price: Option<i64>,
}

pub fn parse_active(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "y" | "да" | "+" => Some(true),
        "0" | "false" | "no" | "n" | "нет" | "-" => Some(false),
        _ => None,
    }
}

fn parse_stock(raw: &str) -> Option<i64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    // Spreadsheets hand integers back as "5.0" now and then.
    let digits = compact
        .strip_suffix(".0")
        .or_else(|| compact.strip_suffix(",0"))
        .unwrap_or(&compact);
    digits.parse::<i64>().ok().filter(|n| *n >= 0)
}

/// Validate one data row. Blank rows yield `Ok(None)`.
pub fn parse_row(header: &HeaderMap, row: &TableRow) -> Result<Option<ParsedRow>, RowError> {
    if row.cells.iter().all(|c| c.trim().is_empty()) {
        return Ok(None);
    }
    let fail = |message: String| RowError {
        line: row.line,
        message,
    };

    let title = header
        .get(row, Column::Title)
        .ok_or_else(|| fail("title is empty".into()))?
        .to_string();
    let raw_price = header.get(row, Column::Price).unwrap_or("");
    let price = parse_price(raw_price).map_err(|e| fail(format!("price: {e}")))?;

    let is_active = match header.get(row, Column::Active) {
        Some(raw) => parse_active(raw).ok_or_else(|| fail(format!("active: unrecognised value {raw:?}")))?,
        None => true,
    };

    let stock = header
        .get(row, Column::Stock)
        .map(|raw| parse_stock(raw).ok_or_else(|| fail(format!("stock: not a non-negative integer {raw:?}"))))
        .transpose()?;
    let city_price = header
        .get(row, Column::CityPrice)
        .map(|raw| parse_price(raw).map_err(|e| fail(format!("city_price: {e}"))))
        .transpose()?;
    let city = header.get(row, Column::City).map(str::to_string);
    if city.is_none() && (stock.is_some() || city_price.is_some()) {
        return Err(fail("city is required when stock or city_price is given".into()));
    }

    let text = |col| header.get(row, col).map(str::to_string);
    Ok(Some(ParsedRow {
        line: row.line,
        id: text(Column::Id),
        sku: text(Column::Sku),
        title,
        price,
        is_active,
        image_url: text(Column::Image),
        description: text(Column::Description),
        category: text(Column::Category),
        city,
        stock,
        city_price,
    }))
}
