//! Minimal XLSX reader: first worksheet, cell values as text.
use super::{ImportError, TableRow};
use async_zip::base::read::mem::ZipFileReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

pub fn looks_like_zip(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes.starts_with(b"PK\x03\x04")
}

fn xlsx_err(err: impl Display) -> ImportError {
    ImportError::Xlsx(err.to_string())
}

/// Sheet limits of Excel itself; references past them are rejected.
const MAX_ROWS: usize = 1_048_576;
const MAX_COLUMNS: usize = 16_384;

/// Read the first worksheet of a workbook into rows numbered as in Excel.
pub async fn read_first_sheet(bytes: Vec<u8>) -> Result<Vec<TableRow>, ImportError> {
    let zip = ZipFileReader::new(bytes).await.map_err(xlsx_err)?;

    let mut entries: HashMap<String, usize> = HashMap::new();
    let mut sheets: Vec<(String, usize)> = Vec::new();
    for (idx, entry) in zip.file().entries().iter().enumerate() {
        let Ok(name) = entry.filename().as_str() else {
            continue;
        };
        if name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml") {
            sheets.push((name.to_string(), idx));
        }
        entries.insert(name.to_string(), idx);
    }

    let ordered = match (entries.get("xl/workbook.xml"), entries.get("xl/_rels/workbook.xml.rels")) {
        (Some(&wb), Some(&rels)) => {
            first_sheet_target(&read_entry(&zip, wb).await?, &read_entry(&zip, rels).await?)?
                .and_then(|target| entries.get(&target).copied())
        }
        _ => None,
    };
    let sheet_idx = match ordered {
        Some(idx) => idx,
        None => {
            // sheet1.xml before sheet10.xml
            sheets.sort_by_key(|(name, _)| (name.len(), name.clone()));
            sheets
                .first()
                .map(|(_, idx)| *idx)
                .ok_or_else(|| ImportError::Xlsx("workbook has no worksheets".into()))?
        }
    };

    let shared = match entries.get("xl/sharedStrings.xml") {
        Some(&idx) => parse_shared_strings(&read_entry(&zip, idx).await?)?,
        None => Vec::new(),
    };
    parse_sheet(&read_entry(&zip, sheet_idx).await?, &shared)
}

/// Archive path of the first sheet listed in `xl/workbook.xml`, resolved
/// through the workbook relationships.
pub fn first_sheet_target(workbook: &[u8], rels: &[u8]) -> Result<Option<String>, ImportError> {
    let mut reader = Reader::from_reader(workbook);
    let mut buf = Vec::new();
    let mut rel_id = None;
    while rel_id.is_none() {
        match reader.read_event_into(&mut buf).map_err(xlsx_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                for a in e.attributes() {
                    let a = a.map_err(xlsx_err)?;
                    if a.key.local_name().as_ref() == b"id" {
                        rel_id = Some(a.unescape_value().map_err(xlsx_err)?.into_owned());
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
    let Some(rel_id) = rel_id else {
        return Ok(None);
    };

    let mut reader = Reader::from_reader(rels);
    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr(&e, b"Id")?.as_deref() == Some(rel_id.as_str()) {
                    return Ok(attr(&e, b"Target")?.map(|t| match t.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{t}"),
                    }));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

async fn read_entry(zip: &ZipFileReader, idx: usize) -> Result<Vec<u8>, ImportError> {
    let mut reader = zip.reader_with_entry(idx).await.map_err(xlsx_err)?;
    let mut buf = Vec::new();
    reader.read_to_end_checked(&mut buf).await.map_err(xlsx_err)?;
    Ok(buf)
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ImportError> {
    match e.try_get_attribute(key).map_err(xlsx_err)? {
        Some(a) => Ok(Some(a.unescape_value().map_err(xlsx_err)?.into_owned())),
        None => Ok(None),
    }
}

/// `<sst><si><t>a</t></si><si><r><t>b</t></r><r><t>c</t></r></si></sst>`
pub fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ImportError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_t && !in_phonetic => {
                current.push_str(&t.unescape().map_err(xlsx_err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => out.push(std::mem::take(&mut current)),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// `B12` → (column 1, row 12). `None` for malformed or out-of-sheet refs.
fn split_cell_ref(r: &str) -> Option<(usize, usize)> {
    let split = r.find(|c: char| !c.is_ascii_alphabetic())?;
    let (letters, digits) = r.split_at(split);
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let col = letters
        .bytes()
        .fold(0_usize, |acc, b| acc * 26 + usize::from(b.to_ascii_uppercase() - b'A' + 1));
    let row = digits.parse::<usize>().ok()?;
    (col <= MAX_COLUMNS && (1..=MAX_ROWS).contains(&row)).then_some((col - 1, row))
}

fn row_number(e: &BytesStart<'_>, prev: usize) -> Result<usize, ImportError> {
    let row = attr(e, b"r")?.and_then(|r| r.parse().ok()).unwrap_or(prev + 1);
    if row > MAX_ROWS {
        return Err(ImportError::Xlsx(format!("row {row} is past the end of the sheet")));
    }
    Ok(row)
}

fn column_number(e: &BytesStart<'_>, next_col: usize) -> Result<usize, ImportError> {
    let col = match attr(e, b"r")? {
        Some(r) => split_cell_ref(&r)
            .map(|(c, _)| c)
            .ok_or_else(|| ImportError::Xlsx(format!("bad cell reference {r:?}")))?,
        None => next_col,
    };
    if col >= MAX_COLUMNS {
        return Err(ImportError::Xlsx("too many columns".into()));
    }
    Ok(col)
}

/// Numbers as stored by Excel (`0.30000000000000004`) rendered the way a
/// user typed them.
fn normalize_number(raw: &str) -> String {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => format!("{v:.0}"),
        Ok(v) if v.is_finite() => {
            let s = format!("{v:.10}");
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        _ => raw.to_string(),
    }
}

#[derive(Default)]
struct Cell {
    col: usize,
    kind: Option<String>,
    value: String,
}

impl Cell {
    fn resolve(self, shared: &[String]) -> String {
        match self.kind.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i).cloned())
                .unwrap_or_default(),
            Some("str") | Some("inlineStr") | Some("e") => self.value,
            Some("b") => if self.value.trim() == "1" { "1" } else { "0" }.to_string(),
            _ => normalize_number(self.value.trim()),
        }
    }
}

pub fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<Vec<TableRow>, ImportError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
    let mut row_no = 0_usize;
    let mut next_col = 0_usize;
    let mut cell: Option<Cell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(xlsx_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row_no = row_number(&e, row_no)?;
                    next_col = 0;
                }
                b"c" => {
                    let col = column_number(&e, next_col)?;
                    next_col = col + 1;
                    cell = Some(Cell {
                        col,
                        kind: attr(&e, b"t")?,
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => row_no = row_number(&e, row_no)?,
                b"c" => next_col = column_number(&e, next_col)? + 1,
                _ => {}
            },
            Event::Text(t) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&t.unescape().map_err(xlsx_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let col = c.col;
                        let value = c.resolve(shared);
                        if !value.is_empty() {
                            rows.entry(row_no).or_default().insert(col, value);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // Rows without a value in any cell come back as blank rows so they
    // still show up in the line sequence.
    let mut out = Vec::new();
    let mut next_line = None;
    for (line, cells) in rows {
        if let Some(next) = next_line {
            out.extend((next..line).map(TableRow::blank));
        }
        next_line = Some(line + 1);
        let width = cells.keys().next_back().map_or(0, |c| c + 1);
        let mut values = vec![String::new(); width];
        for (col, v) in cells {
            values[col] = v;
        }
        out.push(TableRow { line, cells: values });
    }
    Ok(out)
}
