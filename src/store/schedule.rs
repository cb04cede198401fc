/*!
Training schedule methods.

Dates are represented by the `time::Date` struct; a schedule's class dates
are a single `DATE[]` column.
*/
use tokio_postgres::Row;

use super::{Store, DbError};
use crate::academic::TrainingSchedule;

fn schedule_from_row(row: &Row) -> Result<TrainingSchedule, DbError> {
    Ok(TrainingSchedule {
        id: row.try_get("id")?,
        subject: row.try_get("subject")?,
        department: row.try_get("department")?,
        start: row.try_get("start_date")?,
        duration: row.try_get("duration")?,
        class_dates: row.try_get("class_dates")?,
    })
}

fn schedules_from_rows(rows: &[Row]) -> Result<Vec<TrainingSchedule>, DbError> {
    rows.iter()
        .map(|row| schedule_from_row(row)
            .map_err(|e| e.annotate("Unable to read TrainingSchedule from database")))
        .collect()
}

impl Store {
    pub async fn insert_schedule(&self, s: &TrainingSchedule) -> Result<i64, DbError> {
        log::trace!("Store::insert_schedule( {:?} ) called.", s);

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO schedules (subject, department, start_date, duration, class_dates)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id",
            &[&s.subject, &s.department, &s.start, &s.duration, &s.class_dates]
        ).await?;

        Ok(row.try_get("id")?)
    }

    pub async fn update_schedule(&self, s: &TrainingSchedule) -> Result<(), DbError> {
        log::trace!("Store::update_schedule( {:?} ) called.", s);

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE schedules SET
                subject = $1, department = $2, start_date = $3,
                duration = $4, class_dates = $5
            WHERE id = $6",
            &[&s.subject, &s.department, &s.start, &s.duration, &s.class_dates, &s.id]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no schedule with id {}.", &s.id)))
        } else {
            Ok(())
        }
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_schedule( {} ) called.", &id);

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM schedules WHERE id = $1", &[&id]).await?;

        if n == 0 {
            Err(DbError(format!("There is no schedule with id {}.", &id)))
        } else {
            Ok(())
        }
    }

    pub async fn get_schedules(&self) -> Result<Vec<TrainingSchedule>, DbError> {
        log::trace!("Store::get_schedules() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM schedules ORDER BY start_date, id", &[]
        ).await?;

        schedules_from_rows(&rows)
    }

    pub async fn get_schedules_by_department(
        &self,
        department: i64
    ) -> Result<Vec<TrainingSchedule>, DbError> {
        log::trace!("Store::get_schedules_by_department( {} ) called.", &department);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM schedules WHERE department = $1 ORDER BY start_date, id",
            &[&department]
        ).await?;

        schedules_from_rows(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use time::macros::date;

    use crate::academic::Subject;
    use crate::tests::{db_tests_enabled, ensure_logging};
    use crate::store::tests::TEST_CONNECTION;

    #[tokio::test]
    #[serial]
    async fn schedules() {
        ensure_logging();
        if !db_tests_enabled() { return; }

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let dept = db.insert_department("Electrical").await.unwrap();
        let subj = db.insert_subject(&Subject {
            id: 0, name: "Circuits".to_owned(), department: dept, teacher: None,
        }).await.unwrap();

        let mut s = TrainingSchedule {
            id: 0, subject: subj, department: dept,
            start: date!(2024-03-04), duration: 5, class_dates: vec![],
        };
        s.fill_class_dates();
        s.id = db.insert_schedule(&s).await.unwrap();

        assert_eq!(db.get_schedules_by_department(dept).await.unwrap(), vec![s.clone()]);
        assert!(db.get_schedules_by_department(dept + 1).await.unwrap().is_empty());

        s.class_dates.truncate(2);
        db.update_schedule(&s).await.unwrap();
        assert_eq!(db.get_schedules().await.unwrap(), vec![s.clone()]);

        // Moving the subject takes its schedules along.
        let mech = db.insert_department("Mechanical").await.unwrap();
        db.update_subject(&Subject {
            id: subj, name: "Circuits".to_owned(), department: mech, teacher: None,
        }).await.unwrap();
        assert!(db.get_schedules_by_department(dept).await.unwrap().is_empty());
        s.department = mech;
        assert_eq!(db.get_schedules_by_department(mech).await.unwrap(), vec![s.clone()]);

        db.delete_schedule(s.id).await.unwrap();
        assert!(db.delete_schedule(s.id).await.is_err());

        db.delete_subject(subj).await.unwrap();
        db.delete_department(dept).await.unwrap();
        db.delete_department(mech).await.unwrap();
        db.nuke_database().await.unwrap();
    }
}
