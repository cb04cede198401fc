/*!
`Store` methods et. al. for dealing with `Mark` insertion, update,
and retrieval.
*/
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{Row, types::ToSql, types::Type};

use super::{Store, DbError};
use crate::marks::Mark;

fn mark_from_row(row: &Row) -> Result<Mark, DbError> {
    Ok(Mark {
        id: row.try_get("id")?,
        student: row.try_get("student")?,
        subject: row.try_get("subject")?,
        test_date: row.try_get("test_date")?,
        marks: row.try_get("marks")?,
        total: row.try_get("total")?,
    })
}

fn marks_from_rows(rows: &[Row]) -> Result<Vec<Mark>, DbError> {
    let mut marks: Vec<Mark> = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        match mark_from_row(row) {
            Ok(m) => { marks.push(m); },
            Err(e) => {
                return Err(e.annotate("Unable to read Mark from database"));
            },
        }
    }
    Ok(marks)
}

impl Store {
    pub async fn insert_mark(&self, m: &Mark) -> Result<i64, DbError> {
        log::trace!("Store::insert_mark( {:?} ) called.", m);

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO marks (student, subject, test_date, marks, total)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id",
            &[&m.student, &m.subject, &m.test_date, &m.marks, &m.total]
        ).await?;

        Ok(row.try_get("id")?)
    }

    /// Insert a batch of marks in a single transaction.
    pub async fn insert_marks(&self, marks: &[Mark]) -> Result<usize, DbError> {
        log::trace!("Store::insert_marks( [ {} marks ] ) called.", marks.len());

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let insert_stmt = t.prepare_typed(
            "INSERT INTO marks (student, subject, test_date, marks, total)
                VALUES ($1, $2, $3, $4, $5)",
            &[Type::INT8, Type::INT8, Type::DATE, Type::FLOAT4, Type::FLOAT4]
        ).await?;

        let pvec: Vec<[&(dyn ToSql + Sync); 5]> = marks.iter()
            .map(|m| {
                let p: [&(dyn ToSql + Sync); 5] = [
                    &m.student, &m.subject, &m.test_date, &m.marks, &m.total
                ];
                p
            }).collect();

        let mut n_inserted: u64 = 0;
        {
            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&insert_stmt, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_inserted += 1; },
                    Err(e) => {
                        return Err(DbError::from(e)
                            .annotate("Error inserting Mark into database"));
                    },
                }
            }
        }

        t.commit().await?;

        Ok(n_inserted as usize)
    }

    pub async fn update_mark(&self, m: &Mark) -> Result<(), DbError> {
        log::trace!("Store::update_mark( {:?} ) called.", m);

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE marks SET
                test_date = $1, marks = $2, total = $3
            WHERE id = $4 AND student = $5 AND subject = $6",
            &[&m.test_date, &m.marks, &m.total, &m.id, &m.student, &m.subject]
        ).await?;

        if n == 0 {
            Err(DbError(format!(
                "There is no mark with id {} for student {} in subject {}.",
                &m.id, &m.student, &m.subject
            )))
        } else {
            Ok(())
        }
    }

    /// Delete a mark, returning what was deleted.
    pub async fn delete_mark(&self, id: i64) -> Result<Mark, DbError> {
        log::trace!("Store::delete_mark( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "DELETE FROM marks WHERE id = $1 RETURNING *", &[&id]
        ).await? {
            Some(row) => mark_from_row(&row),
            None => Err(DbError(format!("There is no mark with id {}.", &id))),
        }
    }

    pub async fn get_mark(&self, id: i64) -> Result<Option<Mark>, DbError> {
        log::trace!("Store::get_mark( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM marks WHERE id = $1", &[&id]).await? {
            Some(row) => Ok(Some(mark_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_marks_by_student(&self, student: i64) -> Result<Vec<Mark>, DbError> {
        log::trace!("Store::get_marks_by_student( {} ) called.", &student);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM marks WHERE student = $1 ORDER BY test_date, subject",
            &[&student]
        ).await?;

        marks_from_rows(&rows)
    }

    pub async fn get_marks_by_subjects(&self, subjects: &[i64]) -> Result<Vec<Mark>, DbError> {
        log::trace!("Store::get_marks_by_subjects( {:?} ) called.", subjects);

        let client = self.connect().await?;
        let stmt = client.prepare_typed(
            "SELECT * FROM marks WHERE subject = ANY($1)
                ORDER BY test_date, subject, student",
            &[Type::INT8_ARRAY]
        ).await?;
        let rows = client.query(&stmt, &[&subjects]).await?;

        marks_from_rows(&rows)
    }

    pub async fn get_all_marks(&self) -> Result<Vec<Mark>, DbError> {
        log::trace!("Store::get_all_marks() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM marks ORDER BY test_date, subject, student",
            &[]
        ).await?;

        marks_from_rows(&rows)
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
    async fn marks_round_trip() {
        ensure_logging();
        if !db_tests_enabled() { return; }

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let dept = db.insert_department("Electrical").await.unwrap();
        let subj = db.insert_subject(&Subject {
            id: 0, name: "Circuits".to_owned(), department: dept, teacher: None,
        }).await.unwrap();
        let stud = db.insert_student("asha@example.org", "Asha Nair", "OJT001", Some(dept))
            .await.unwrap();

        let m = Mark {
            id: 0, student: stud, subject: subj,
            test_date: date!(2024-03-04), marks: 18.0, total: 20.0,
        };
        let id = db.insert_mark(&m).await.unwrap();
        let batch = vec![
            Mark { test_date: date!(2024-03-11), marks: 19.0, ..m.clone() },
            Mark { test_date: date!(2024-03-18), marks: 12.0, ..m.clone() },
        ];
        assert_eq!(db.insert_marks(&batch).await.unwrap(), 2);
        assert!(db.enroll(stud, subj).await.unwrap());
        assert!(!db.enroll(stud, subj).await.unwrap());

        let got = db.get_marks_by_student(stud).await.unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].id, id);
        assert_eq!(db.get_marks_by_subjects(&[subj]).await.unwrap().len(), 3);
        assert!(db.get_marks_by_subjects(&[subj + 1]).await.unwrap().is_empty());

        let mut first = got[0].clone();
        first.marks = 20.0;
        db.update_mark(&first).await.unwrap();
        assert_eq!(db.get_mark(id).await.unwrap(), Some(first.clone()));

        assert_eq!(db.delete_mark(id).await.unwrap(), first);
        assert!(db.delete_mark(id).await.is_err());

        db.delete_user(stud).await.unwrap();
        db.delete_subject(subj).await.unwrap();
        db.delete_department(dept).await.unwrap();
        db.nuke_database().await.unwrap();
    }
}
