// Plain text helpers for CLI output

/// Print a simple key-value pair
pub fn print_field(label: &str, value: &str) {
    println!("{}", field_line(label, value));
}

fn field_line(label: &str, value: &str) -> String {
    format!("{:<20} {}", format!("{}:", label), value)
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    println!("{}", table_line(columns));
}

/// Print a table row, truncating cells wider than their column
pub fn print_table_row(values: &[(&str, usize)]) {
    println!("{}", table_line(values));
}

fn table_line(cells: &[(&str, usize)]) -> String {
    cells
        .iter()
        .map(|(val, width)| {
            let s = if val.chars().count() > *width && *width > 3 {
                let cut: String = val.chars().take(width - 3).collect();
                format!("{}...", cut)
            } else {
                val.to_string()
            };
            format!("{:<width$}", s, width = width)
        })
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}
