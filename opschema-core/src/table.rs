#![forbid(unsafe_code)]

/// Aligns the cells of `rows` into columns separated by `sep`.
///
/// Rows may be ragged; missing cells render as empty. `left_align` picks the
/// alignment per column; columns past its end are left-aligned. Trailing
/// whitespace is trimmed from every line.
pub fn tabulate(rows: &[Vec<String>], sep: &str, left_align: &[bool]) -> Vec<String> {
    let ncols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let widths: Vec<usize> = (0..ncols)
        .map(|c| {
            rows.iter()
                .map(|r| r.get(c).map(|s| s.chars().count()).unwrap_or(0))
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let cells: Vec<String> = (0..ncols)
                .map(|c| {
                    let cell = row.get(c).map(String::as_str).unwrap_or("");
                    let w = widths[c];
                    if left_align.get(c).copied().unwrap_or(true) {
                        format!("{cell:<w$}")
                    } else {
                        format!("{cell:>w$}")
                    }
                })
                .collect();
            cells.join(sep).trim_end().to_string()
        })
        .collect()
}

/// Transposes a list of columns into rows.
pub fn transpose(columns: &[Vec<String>]) -> Vec<Vec<String>> {
    let nrows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    (0..nrows)
        .map(|r| {
            columns
                .iter()
                .map(|c| c.get(r).cloned().unwrap_or_default())
                .collect()
        })
        .collect()
}
