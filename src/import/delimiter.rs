//! Field delimiter sniffing for delimited text.

/// Checked in order; earlier wins ties. Russian-locale Excel writes `;`.
pub const CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];
const SAMPLE_RECORDS: usize = 10;

/// Per-record delimiter counts for the first non-empty records, ignoring
/// delimiters inside quoted fields (which may span lines).
fn sample_counts(text: &str) -> Vec<[usize; CANDIDATES.len()]> {
    let mut records = Vec::new();
    let mut counts = [0_usize; CANDIDATES.len()];
    let mut in_quotes = false;
    let mut non_blank = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                non_blank = true;
            }
            '\n' if !in_quotes => {
                if non_blank {
                    records.push(counts);
                    if records.len() == SAMPLE_RECORDS {
                        return records;
                    }
                }
                counts = [0; CANDIDATES.len()];
                non_blank = false;
            }
            '\r' => {}
            c => {
                if !in_quotes {
                    if let Some(i) = CANDIDATES.iter().position(|&d| d as char == c) {
                        counts[i] += 1;
                    }
                }
                if !c.is_whitespace() {
                    non_blank = true;
                }
            }
        }
    }
    if non_blank {
        records.push(counts);
    }
    records
}

/// Pick the delimiter that splits the sampled records most consistently.
pub fn sniff(text: &str) -> u8 {
    let records = sample_counts(text);
    let mut best: Option<(u8, (bool, usize, usize))> = None;

    for (i, &delim) in CANDIDATES.iter().enumerate() {
        let per_record: Vec<usize> = records.iter().map(|r| r[i]).collect();
        let total: usize = per_record.iter().sum();
        if total == 0 {
            continue;
        }
        let min = per_record.iter().copied().min().unwrap_or(0);
        let consistent = min > 0 && per_record.iter().all(|&n| n == per_record[0]);
        let key = (consistent, min, total);
        if best.map_or(true, |(_, best_key)| key > best_key) {
            best = Some((delim, key));
        }
    }
    best.map_or(b',', |(d, _)| d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semicolon_export() {
        let text = "Название;Цена;Остаток\nЧай, зелёный;350,00;5\nКофе;990;1\n";
        assert_eq!(sniff(text), b';');
    }

    #[test]
    fn comma_with_quoted_commas() {
        let text = "title,price\n\"Tea; green, 100g\",3.50\n\"Coffee; dark\",9.90\n";
        assert_eq!(sniff(text), b',');
    }

    #[test]
    fn tab_separated() {
        let text = "title\tprice\tcity\nTea\t350\tMoscow\n";
        assert_eq!(sniff(text), b'\t');
    }

    #[test]
    fn pipe_separated_with_crlf() {
        let text = "title|price\r\nTea|350\r\nCoffee|990\r\n";
        assert_eq!(sniff(text), b'|');
    }

    #[test]
    fn quoted_newlines_do_not_split_records() {
        let text = "title;description;price\nTea;\"line one\nline two, with comma\";350\n";
        assert_eq!(sniff(text), b';');
    }

    #[test]
    fn single_column_defaults_to_comma() {
        assert_eq!(sniff("title\nTea\nCoffee\n"), b',');
        assert_eq!(sniff(""), b',');
    }

    #[test]
    fn blank_lines_are_ignored() {
        let text = "\n\ntitle;price\n\nTea;1\n";
        assert_eq!(sniff(text), b';');
    }
}
