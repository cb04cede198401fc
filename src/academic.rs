/*!
Departments, the subjects they offer, and the training schedules that
place those subjects on the calendar.
*/
use serde::{Deserialize, Serialize};
use time::{Date, Duration, Weekday};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Department {
    /// Set by the database upon insertion.
    #[serde(default)]
    pub id: i64,
    /// Unique.
    pub name: String,
    /// ids of the subjects this department offers; filled in from the
    /// `subjects` table, never written through this field.
    #[serde(default)]
    pub subjects: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Subject {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// id of the owning `Department`.
    pub department: i64,
    /// User id of the assigned teacher, if any.
    #[serde(default)]
    pub teacher: Option<i64>,
}

impl Subject {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Subject name must not be blank.".to_owned());
        }
        Ok(())
    }
}

/// Longest training a schedule may describe: two years.
pub const MAX_DURATION_DAYS: i32 = 730;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrainingSchedule {
    #[serde(default)]
    pub id: i64,
    pub subject: i64,
    pub department: i64,
    pub start: Date,
    /// Length of the training, in days.
    pub duration: i32,
    #[serde(default)]
    pub class_dates: Vec<Date>,
}

impl TrainingSchedule {
    /// Every Monday through Friday in `[start, start + duration days)`.
    /// `duration` is clamped to `[0, MAX_DURATION_DAYS]`.
    pub fn weekday_class_dates(start: Date, duration: i32) -> Vec<Date> {
        let mut dates = Vec::new();
        let mut d = start;
        for _ in 0..duration.clamp(0, MAX_DURATION_DAYS) {
            match d.weekday() {
                Weekday::Saturday | Weekday::Sunday => {},
                _ => { dates.push(d); },
            }
            d = match d.next_day() {
                Some(next) => next,
                None => break,
            };
        }
        dates
    }

    /// First day _after_ the training.
    pub fn end(&self) -> Date {
        self.start.saturating_add(Duration::days(self.duration as i64))
    }

    /// Generate weekday class dates if none were given; otherwise just
    /// sort and dedup the given ones.
    pub fn fill_class_dates(&mut self) {
        if self.class_dates.is_empty() {
            self.class_dates = TrainingSchedule::weekday_class_dates(
                self.start, self.duration
            );
        } else {
            self.class_dates.sort();
            self.class_dates.dedup();
        }
    }

    pub fn check_duration(&self) -> Result<(), String> {
        if self.duration < 1 {
            return Err(format!(
                "Schedule duration must be at least one day (not {}).",
                &self.duration
            ));
        }
        if self.duration > MAX_DURATION_DAYS {
            return Err(format!(
                "Schedule duration must be at most {} days (not {}).",
                &MAX_DURATION_DAYS, &self.duration
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.check_duration()?;
        let end = self.end();
        for d in self.class_dates.iter() {
            if d < &self.start || d >= &end {
                return Err(format!(
                    "Class date {} falls outside the training period {} to {}.",
                    d, &self.start, &end
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn weekdays_skip_weekends() {
        // 2024-03-01 is a Friday.
        let dates = TrainingSchedule::weekday_class_dates(date!(2024-03-01), 7);
        assert_eq!(
            dates,
            vec![
                date!(2024-03-01), date!(2024-03-04), date!(2024-03-05),
                date!(2024-03-06), date!(2024-03-07),
            ]
        );
        assert!(TrainingSchedule::weekday_class_dates(date!(2024-03-01), 0).is_empty());

        let capped = TrainingSchedule::weekday_class_dates(date!(2024-03-01), i32::MAX);
        assert!(capped.len() <= MAX_DURATION_DAYS as usize);
        assert_eq!(
            capped.len(),
            TrainingSchedule::weekday_class_dates(date!(2024-03-01), MAX_DURATION_DAYS).len()
        );
    }

    #[test]
    fn schedule_validation() {
        let mut s = TrainingSchedule {
            id: 0,
            subject: 1,
            department: 1,
            start: date!(2024-03-04),
            duration: 14,
            class_dates: vec![date!(2024-03-12), date!(2024-03-05), date!(2024-03-05)],
        };
        s.fill_class_dates();
        assert_eq!(s.class_dates, vec![date!(2024-03-05), date!(2024-03-12)]);
        assert!(s.validate().is_ok());
        assert_eq!(s.end(), date!(2024-03-18));

        s.class_dates.push(date!(2024-03-18));
        assert!(s.validate().is_err());

        s.class_dates.clear();
        s.fill_class_dates();
        assert_eq!(s.class_dates.len(), 10);

        s.duration = 0;
        assert!(s.validate().is_err());
        s.duration = MAX_DURATION_DAYS + 1;
        assert!(s.check_duration().is_err());
        s.duration = MAX_DURATION_DAYS;
        assert!(s.check_duration().is_ok());
    }
}
