#![forbid(unsafe_code)]

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Right,
}

#[derive(Debug, Clone)]
struct Column {
    title: String,
    align: Align,
}

/// Column-aligned plain text table, also exportable as CSV.
///
/// Widths count chars, which is right for the ASCII and single-width
/// markers this tool prints.
#[derive(Debug, Default)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: headers
                .into_iter()
                .map(|h| Column {
                    title: h.into(),
                    align: Align::Left,
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Sets the alignment of the column titled `title`.
    #[must_use]
    pub fn align(mut self, title: &str, align: Align) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.title == title) {
            col.align = align;
        }
        self
    }

    pub fn row(&mut self, cells: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_text(&mut io::stdout().lock())
    }

    pub fn print_csv(&self) -> io::Result<()> {
        self.write_csv(io::stdout().lock())
    }

    fn write_csv(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(self.columns.iter().map(|c| c.title.as_str()))?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()
    }

    fn write_text(&self, out: &mut impl io::Write) -> io::Result<()> {
        let widths = self.widths();
        let titles: Vec<&str> = self.columns.iter().map(|c| c.title.as_str()).collect();
        writeln!(out, "{}", self.render_line(&titles, &widths))?;
        for row in &self.rows {
            let cells: Vec<&str> = row.iter().map(String::as_str).collect();
            writeln!(out, "{}", self.render_line(&cells, &widths))?;
        }
        Ok(())
    }

    fn widths(&self) -> Vec<usize> {
        let ncols = self
            .rows
            .iter()
            .map(Vec::len)
            .chain([self.columns.len()])
            .max()
            .unwrap_or_default();
        (0..ncols)
            .map(|i| {
                let title = self.columns.get(i).map_or(0, |c| width(&c.title));
                self.rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|cell| width(cell))
                    .fold(title, usize::max)
            })
            .collect()
    }

    fn render_line(&self, cells: &[&str], widths: &[usize]) -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            let pad = widths.get(i).map_or(0, |w| w.saturating_sub(width(cell)));
            let align = self.columns.get(i).map_or(Align::Left, |c| c.align);
            match align {
                Align::Left => {
                    line.push_str(cell);
                    line.extend(std::iter::repeat_n(' ', pad));
                }
                Align::Right => {
                    line.extend(std::iter::repeat_n(' ', pad));
                    line.push_str(cell);
                }
            }
        }
        line.truncate(line.trim_end().len());
        line
    }
}

fn width(s: &str) -> usize {
    s.chars().count()
}
