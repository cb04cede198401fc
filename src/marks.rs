/*!
The `Mark` struct and the reports built from collections of them.

All report functions work on plain slices of `Mark`s; the handlers fetch
the relevant marks from the database and hand them over.
*/
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::DATE_FMT;

/// A single test score for one student in one subject.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Mark {
    #[serde(default)]
    pub id: i64,
    /// User id of the `Student`.
    pub student: i64,
    /// id of the `Subject`.
    pub subject: i64,
    pub test_date: Date,
    pub marks: f32,
    pub total: f32,
}

impl Mark {
    pub fn percentage(&self) -> f32 {
        100.0 * self.marks / self.total
    }

    pub fn validate(&self) -> Result<(), String> {
        check_score(self.marks, self.total)
    }
}

/// `0 <= marks <= total`, `total > 0`, and both finite.
fn check_score(marks: f32, total: f32) -> Result<(), String> {
    if !(marks.is_finite() && total.is_finite()) {
        return Err(format!("{} out of {} is not a valid score.", &marks, &total));
    }
    if !(total > 0.0) {
        return Err(format!("Total marks must be positive (not {}).", &total));
    }
    if !(marks >= 0.0) {
        return Err(format!("Marks must not be negative (not {}).", &marks));
    }
    if marks > total {
        return Err(format!(
            "Marks ({}) must not exceed total marks ({}).",
            &marks, &total
        ));
    }
    Ok(())
}

fn blank_means_none(s: Option<&str>) -> Option<&str> {
    match s {
        Some(s) => match s.trim() {
            "" => None,
            x => Some(x),
        },
        None => None,
    }
}

/// One mark as read from a bulk upload, before the student id and subject
/// name have been resolved to database ids.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkRow {
    pub student_id: String,
    pub subject: String,
    pub test_date: Date,
    pub marks: f32,
    pub total: f32,
}

impl MarkRow {
    /**
    Mark .csv rows should look like this

    ```csv
    #student_id, subject,   date,       marks, total
    OJT001,      Circuits,  2024-03-04,    18,    20
    OJT002,               ,           ,    15,
    ```

    Columns `subject`, `date`, and `total` default to the value of the
    previous row, so a whole test's worth of marks only needs them once.
    */
    pub fn from_csv_line(
        row: &csv::StringRecord,
        prev: Option<&MarkRow>
    ) -> Result<MarkRow, String> {
        log::trace!("MarkRow::from_csv_line( {:?} ) called.", row);

        let student_id = match blank_means_none(row.get(0)) {
            Some(s) => s.to_owned(),
            None => { return Err("No student id.".into()); },
        };

        let subject = match blank_means_none(row.get(1)) {
            Some(s) => s.to_owned(),
            None => match prev {
                Some(r) => r.subject.clone(),
                None => { return Err("No subject.".into()); },
            },
        };

        let test_date = match blank_means_none(row.get(2)) {
            Some(s) => match Date::parse(s, DATE_FMT) {
                Ok(d) => d,
                Err(_) => { return Err(format!("Unable to parse {:?} as a date.", s)); },
            },
            None => match prev {
                Some(r) => r.test_date,
                None => { return Err("No test date.".into()); },
            },
        };

        let marks: f32 = match blank_means_none(row.get(3)) {
            Some(s) => match s.parse() {
                Ok(x) => x,
                Err(_) => { return Err(format!("Unable to parse {:?} as marks.", s)); },
            },
            None => { return Err("No marks.".into()); },
        };

        let total: f32 = match blank_means_none(row.get(4)) {
            Some(s) => match s.parse() {
                Ok(x) => x,
                Err(_) => { return Err(format!("Unable to parse {:?} as total marks.", s)); },
            },
            None => match prev {
                Some(r) => r.total,
                None => { return Err("No total marks.".into()); },
            },
        };

        Ok(MarkRow { student_id, subject, test_date, marks, total })
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<MarkRow>, String> {
        log::trace!("MarkRow::vec_from_csv_reader(...) called.");

        let mut csv_reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .has_headers(false)
            .from_reader(r);

        let mut rows: Vec<MarkRow> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            let record = res.map_err(|e| match e.position() {
                Some(p) => format!("Error on line {}: {}", p.line(), &e),
                None => format!("Error in CSV record {}: {}", &n, &e),
            })?;
            let line_err = |e: String| match record.position() {
                Some(p) => format!("Error on line {}: {}", p.line(), &e),
                None => format!("Error in CSV record {}: {}", &n, &e),
            };

            let row = MarkRow::from_csv_line(&record, rows.last())
                .map_err(line_err)?;
            check_score(row.marks, row.total).map_err(line_err)?;
            rows.push(row);
        }

        log::trace!("MarkRow::vec_from_csv_reader() returns {} rows.", rows.len());
        Ok(rows)
    }
}

/// Aggregate performance in one subject.
#[derive(Clone, Debug, Serialize)]
pub struct SubjectSummary {
    pub subject: i64,
    pub n_tests: usize,
    /// Sum of marks scored.
    pub marks: f32,
    /// Sum of marks possible.
    pub total: f32,
    /// `100 * marks / total`
    pub percentage: f32,
    pub best: f32,
    pub worst: f32,
    pub latest: Date,
}

impl SubjectSummary {
    /// One summary per subject present in `marks`, ordered by subject id.
    pub fn from_marks(marks: &[Mark]) -> Vec<SubjectSummary> {
        let mut by_subject: BTreeMap<i64, SubjectSummary> = BTreeMap::new();

        for m in marks.iter() {
            let pct = m.percentage();
            let s = by_subject.entry(m.subject).or_insert_with(|| SubjectSummary {
                subject: m.subject,
                n_tests: 0,
                marks: 0.0,
                total: 0.0,
                percentage: 0.0,
                best: pct,
                worst: pct,
                latest: m.test_date,
            });
            s.n_tests += 1;
            s.marks += m.marks;
            s.total += m.total;
            s.best = s.best.max(pct);
            s.worst = s.worst.min(pct);
            if m.test_date > s.latest {
                s.latest = m.test_date;
            }
        }

        by_subject.into_values()
            .map(|mut s| {
                s.percentage = 100.0 * s.marks / s.total;
                s
            }).collect()
    }
}

/// Which field of a `Mark` labels the rows of a `Pivot`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PivotKey {
    Student,
    Subject,
}

#[derive(Clone, Debug, Serialize)]
pub struct PivotRow {
    pub key: i64,
    /// Human-readable name for `key`; filled in by `Pivot::label_rows()`.
    pub label: Option<String>,
    /// Percentages, one per `Pivot::dates` entry.
    pub cells: Vec<Option<f32>>,
    /// Mean of this row's percentages.
    pub average: f32,
}

/// Marks as a table: test dates across, students (or subjects) down.
#[derive(Clone, Debug, Serialize)]
pub struct Pivot {
    pub dates: Vec<Date>,
    pub rows: Vec<PivotRow>,
}

impl Pivot {
    pub fn label_rows<F>(&mut self, f: F)
    where
        F: Fn(i64) -> Option<String>
    {
        for row in self.rows.iter_mut() {
            row.label = f(row.key);
        }
    }
}

/**
Group `marks` into a table with one column per distinct test date (ascending)
and one row per distinct `key` value (ascending).

A cell holding more than one mark holds the mean of their percentages.
*/
pub fn pivot(marks: &[Mark], key: PivotKey) -> Pivot {
    let dates: Vec<Date> = marks.iter()
        .map(|m| m.test_date)
        .collect::<BTreeSet<Date>>()
        .into_iter()
        .collect();

    // key -> date -> (sum of percentages, count)
    let mut table: BTreeMap<i64, BTreeMap<Date, (f32, usize)>> = BTreeMap::new();
    for m in marks.iter() {
        let k = match key {
            PivotKey::Student => m.student,
            PivotKey::Subject => m.subject,
        };
        let cell = table.entry(k).or_default()
            .entry(m.test_date).or_insert((0.0, 0));
        cell.0 += m.percentage();
        cell.1 += 1;
    }

    let rows: Vec<PivotRow> = table.into_iter()
        .map(|(k, by_date)| {
            let (row_sum, row_n) = by_date.values()
                .fold((0.0_f32, 0_usize), |(s, n), (cs, cn)| (s + cs, n + cn));
            let cells = dates.iter()
                .map(|d| by_date.get(d).map(|(s, n)| s / (*n as f32)))
                .collect();
            PivotRow {
                key: k,
                label: None,
                cells,
                average: row_sum / (row_n as f32),
            }
        }).collect();

    Pivot { dates, rows }
}

/// The Monday on or before `d`.
pub fn week_start(d: Date) -> Date {
    d - Duration::days(d.weekday().number_days_from_monday() as i64)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeekAverage {
    /// Monday of the week.
    pub week: Date,
    pub n_tests: usize,
    /// Mean percentage of the week's marks.
    pub average: f32,
}

/// Mean percentage per week (weeks start on Monday), ascending by week.
pub fn weekly_averages(marks: &[Mark]) -> Vec<WeekAverage> {
    let mut weeks: BTreeMap<Date, (f32, usize)> = BTreeMap::new();
    for m in marks.iter() {
        let w = weeks.entry(week_start(m.test_date)).or_insert((0.0, 0));
        w.0 += m.percentage();
        w.1 += 1;
    }

    weeks.into_iter()
        .map(|(week, (sum, n))| WeekAverage {
            week,
            n_tests: n,
            average: sum / (n as f32),
        }).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: Date,
    pub percentage: f32,
}

/// Percentages in `subject` in test date order.
pub fn subject_trend(marks: &[Mark], subject: i64) -> Vec<TrendPoint> {
    let mut points: Vec<TrendPoint> = marks.iter()
        .filter(|m| m.subject == subject)
        .map(|m| TrendPoint { date: m.test_date, percentage: m.percentage() })
        .collect();
    points.sort_by(|a, b| a.date.cmp(&b.date));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    use float_cmp::approx_eq;
    use time::macros::date;

    fn mk(student: i64, subject: i64, test_date: Date, marks: f32, total: f32) -> Mark {
        Mark { id: 0, student, subject, test_date, marks, total }
    }

    fn sample() -> Vec<Mark> {
        vec![
            mk(1, 10, date!(2024-03-04), 18.0, 20.0),   // 90%
            mk(2, 10, date!(2024-03-04), 15.0, 20.0),   // 75%
            mk(1, 10, date!(2024-03-11), 19.0, 20.0),   // 95%
            mk(1, 20, date!(2024-03-06), 40.0, 50.0),   // 80%
            mk(2, 20, date!(2024-03-13), 25.0, 50.0),   // 50%
        ]
    }

    #[test]
    fn mark_validation() {
        assert!(mk(1, 1, date!(2024-01-01), 5.0, 10.0).validate().is_ok());
        assert!(mk(1, 1, date!(2024-01-01), 10.0, 10.0).validate().is_ok());
        assert!(mk(1, 1, date!(2024-01-01), 11.0, 10.0).validate().is_err());
        assert!(mk(1, 1, date!(2024-01-01), -1.0, 10.0).validate().is_err());
        assert!(mk(1, 1, date!(2024-01-01), 0.0, 0.0).validate().is_err());
        assert!(mk(1, 1, date!(2024-01-01), f32::NAN, 10.0).validate().is_err());
        assert!(mk(1, 1, date!(2024-01-01), f32::INFINITY, f32::INFINITY).validate().is_err());
        assert!(mk(1, 1, date!(2024-01-01), 5.0, f32::INFINITY).validate().is_err());
    }

    #[test]
    fn marks_from_csv() {
        ensure_logging();
        let f = std::fs::File::open("test/good_marks_0.csv").unwrap();
        let rows = MarkRow::vec_from_csv_reader(f).unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(
            rows[1],
            MarkRow {
                student_id: "OJT002".to_owned(),
                subject: "Circuits".to_owned(),
                test_date: date!(2024-03-04),
                marks: 15.0,
                total: 20.0,
            }
        );
        assert_eq!(rows[3].test_date, date!(2024-03-11));
        assert_eq!(rows[4].subject, "Welding");
        assert!(approx_eq!(f32, rows[4].total, 50.0));
    }

    #[test]
    fn bad_marks_csv() {
        ensure_logging();
        let f = std::fs::File::open("test/bad_marks_0.csv").unwrap();
        let e = MarkRow::vec_from_csv_reader(f).unwrap_err();
        assert!(e.contains("line 2"), "{}", &e);

        let text = "OJT001, , 2024-03-04, 18, 20\n";
        let e = MarkRow::vec_from_csv_reader(text.as_bytes()).unwrap_err();
        assert!(e.contains("No subject"), "{}", &e);

        let text = "OJT001, Circuits, 2024-03-04, inf, inf\n";
        let e = MarkRow::vec_from_csv_reader(text.as_bytes()).unwrap_err();
        assert!(e.contains("line 1"), "{}", &e);
        assert!(e.contains("not a valid score"), "{}", &e);
    }

    #[test]
    fn summaries() {
        let sums = SubjectSummary::from_marks(&sample());
        assert_eq!(sums.len(), 2);

        let s = &sums[0];
        assert_eq!((s.subject, s.n_tests), (10, 3));
        assert!(approx_eq!(f32, s.percentage, 100.0 * 52.0 / 60.0, epsilon = 0.001));
        assert!(approx_eq!(f32, s.best, 95.0, epsilon = 0.001));
        assert!(approx_eq!(f32, s.worst, 75.0, epsilon = 0.001));
        assert_eq!(s.latest, date!(2024-03-11));

        let s = &sums[1];
        assert_eq!((s.subject, s.n_tests), (20, 2));
        assert!(approx_eq!(f32, s.percentage, 65.0, epsilon = 0.001));

        assert!(SubjectSummary::from_marks(&[]).is_empty());
    }

    #[test]
    fn pivot_by_student() {
        let subject_10: Vec<Mark> = sample().into_iter()
            .filter(|m| m.subject == 10)
            .collect();
        let mut p = pivot(&subject_10, PivotKey::Student);

        assert_eq!(p.dates, vec![date!(2024-03-04), date!(2024-03-11)]);
        assert_eq!(p.rows.len(), 2);
        assert_eq!(p.rows[0].key, 1);
        assert!(approx_eq!(f32, p.rows[0].cells[0].unwrap(), 90.0, epsilon = 0.001));
        assert!(approx_eq!(f32, p.rows[0].cells[1].unwrap(), 95.0, epsilon = 0.001));
        assert!(approx_eq!(f32, p.rows[0].average, 92.5, epsilon = 0.001));
        assert_eq!(p.rows[1].cells[1], None);

        p.label_rows(|k| Some(format!("student {}", k)));
        assert_eq!(p.rows[1].label.as_deref(), Some("student 2"));
    }

    #[test]
    fn pivot_merges_same_day() {
        let marks = vec![
            mk(1, 10, date!(2024-03-04), 10.0, 20.0),
            mk(1, 10, date!(2024-03-04), 20.0, 20.0),
        ];
        let p = pivot(&marks, PivotKey::Subject);
        assert_eq!(p.rows.len(), 1);
        assert!(approx_eq!(f32, p.rows[0].cells[0].unwrap(), 75.0, epsilon = 0.001));
    }

    #[test]
    fn weeks() {
        assert_eq!(week_start(date!(2024-03-04)), date!(2024-03-04));
        assert_eq!(week_start(date!(2024-03-10)), date!(2024-03-04));
        assert_eq!(week_start(date!(2024-03-13)), date!(2024-03-11));

        let w = weekly_averages(&sample());
        assert_eq!(w.len(), 2);
        assert_eq!((w[0].week, w[0].n_tests), (date!(2024-03-04), 3));
        assert!(approx_eq!(f32, w[0].average, (90.0 + 75.0 + 80.0) / 3.0, epsilon = 0.001));
        assert_eq!((w[1].week, w[1].n_tests), (date!(2024-03-11), 2));
        assert!(approx_eq!(f32, w[1].average, 72.5, epsilon = 0.001));
    }

    #[test]
    fn trend() {
        let mut marks = sample();
        marks.reverse();
        let t = subject_trend(&marks, 10);
        let dates: Vec<Date> = t.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date!(2024-03-04), date!(2024-03-04), date!(2024-03-11)]);
        assert!(subject_trend(&marks, 99).is_empty());
    }
}
