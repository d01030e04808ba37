#![forbid(unsafe_code)]

use std::io;

/// Column-aligned plain text or CSV on stdout.
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_text(io::stdout().lock())
    }

    pub fn write_csv(&self) -> io::Result<()> {
        self.write_csv_to(io::stdout().lock())
    }

    fn write_csv_to(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_text(&self, mut out: impl io::Write) -> io::Result<()> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.headers.len());
        let mut widths = vec![0usize; columns];
        for row in std::iter::once(&self.headers).chain(&self.rows) {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        writeln!(out, "{}", format_row(&self.headers, &widths))?;
        for row in &self.rows {
            writeln!(out, "{}", format_row(row, &widths))?;
        }
        Ok(())
    }
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        // No trailing padding on the last column.
        if i + 1 < row.len() {
            let pad = widths[i].saturating_sub(cell.chars().count());
            out.extend(std::iter::repeat_n(' ', pad));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["PROJECT", "BRANCH", "PATH"]);
        t.row(["acme", "branch/cool-feature", "~/wt/acme/branch/cool-feature"]);
        t.row(["widgets", "pr/7", "~/wt/widgets/pr/7"]);
        t
    }

    #[test]
    fn aligns_columns() {
        let mut buf = Vec::new();
        sample().write_text(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "PROJECT  BRANCH               PATH\n\
             acme     branch/cool-feature  ~/wt/acme/branch/cool-feature\n\
             widgets  pr/7                 ~/wt/widgets/pr/7\n"
        );
    }

    #[test]
    fn csv_quotes_when_needed() {
        let mut t = Table::new(["PROJECT", "BRANCH"]);
        t.row(["acme", "branch/a,b"]);
        let mut buf = Vec::new();
        t.write_csv_to(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "PROJECT,BRANCH\nacme,\"branch/a,b\"\n"
        );
    }
}
