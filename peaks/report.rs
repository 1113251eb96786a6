use serde::Serialize;
use std::io::Write;

/// One reported marker.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakRow {
    pub chromosome: String,
    pub marker_id: String,
    pub position: u64,
    pub p_value: Option<f64>,
    pub weight: f64,
}

/// The strongest peak of every chromosome is significant; the rest are not.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeakReport {
    pub significant: Vec<PeakRow>,
    pub insignificant: Vec<PeakRow>,
}

impl PeakReport {
    /// Adds one chromosome's peaks, ordered most significant first.
    pub fn push_chromosome(&mut self, rows: impl IntoIterator<Item = PeakRow>) {
        let mut rows = rows.into_iter();
        if let Some(top) = rows.next() {
            self.significant.push(top);
        }
        self.insignificant.extend(rows);
    }
}

/// Writes rows as a tab-separated table with a header line.
pub fn write_rows<W: Write>(writer: W, rows: &[PeakRow]) -> Result<(), csv::Error> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_writer(writer);
    if rows.is_empty() {
        out.write_record(["chromosome", "marker_id", "position", "p_value", "weight"])?;
    }
    for row in rows {
        out.serialize(row)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(chromosome: &str, id: &str, weight: f64) -> PeakRow {
        PeakRow {
            chromosome: chromosome.into(),
            marker_id: id.into(),
            position: 1,
            p_value: None,
            weight,
        }
    }

    #[test]
    fn first_peak_per_chromosome_is_significant() {
        let mut report = PeakReport::default();
        report.push_chromosome(vec![row("1", "a", 0.9), row("1", "b", 0.5)]);
        report.push_chromosome(Vec::new());
        report.push_chromosome(vec![row("2", "c", 0.7)]);
        assert_eq!(report.significant, vec![row("1", "a", 0.9), row("2", "c", 0.7)]);
        assert_eq!(report.insignificant, vec![row("1", "b", 0.5)]);
    }

    #[test]
    fn rows_are_written_as_tsv() {
        let mut buffer = Vec::new();
        let mut with_p = row("X", "rs9", 0.25);
        with_p.p_value = Some(0.001);
        write_rows(&mut buffer, &[with_p, row("X", "rs10", 0.5)]).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chromosome\tmarker_id\tposition\tp_value\tweight");
        assert_eq!(lines[1], "X\trs9\t1\t0.001\t0.25");
        assert_eq!(lines[2], "X\trs10\t1\t\t0.5");
    }

    #[test]
    fn empty_table_still_has_a_header() {
        let mut buffer = Vec::new();
        write_rows(&mut buffer, &[]).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "chromosome\tmarker_id\tposition\tp_value\tweight\n"
        );
    }
}
