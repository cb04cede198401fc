/*!
`Store` methods for departments, subjects, and enrollment of students in
subjects.
*/
use std::collections::HashMap;

use tokio_postgres::{Row, types::Type};

use super::{Store, DbError};
use crate::academic::{Department, Subject};

fn subject_from_row(row: &Row) -> Result<Subject, DbError> {
    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        department: row.try_get("department")?,
        teacher: row.try_get("teacher")?,
    })
}

impl Store {
    /// All departments, keyed by id, with their subject lists filled in.
    pub async fn get_departments(&self) -> Result<HashMap<i64, Department>, DbError> {
        log::trace!("Store::get_departments() called.");

        let client = self.connect().await?;
        let (d_res, s_res) = tokio::join!(
            client.query("SELECT id, name FROM departments", &[]),
            client.query("SELECT id, department FROM subjects ORDER BY id", &[]),
        );
        let (dept_rows, subj_rows) = (d_res?, s_res?);

        let mut map: HashMap<i64, Department> = HashMap::with_capacity(dept_rows.len());
        for row in dept_rows.iter() {
            let d = Department {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                subjects: Vec::new(),
            };
            map.insert(d.id, d);
        }

        for row in subj_rows.iter() {
            let dept_id: i64 = row.try_get("department")?;
            let subj_id: i64 = row.try_get("id")?;
            match map.get_mut(&dept_id) {
                Some(d) => { d.subjects.push(subj_id); },
                None => {
                    log::error!(
                        "Subject {} belongs to nonexistent department {}.",
                        &subj_id, &dept_id
                    );
                },
            }
        }

        Ok(map)
    }

    pub async fn insert_department(&self, name: &str) -> Result<i64, DbError> {
        log::trace!("Store::insert_department( {:?} ) called.", name);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if t.query_opt(
            "SELECT id FROM departments WHERE name = $1",
            &[&name]
        ).await?.is_some() {
            return Err(DbError(format!(
                "A department named {:?} already exists.", name
            )));
        }

        let row = t.query_one(
            "INSERT INTO departments (name) VALUES ($1) RETURNING id",
            &[&name]
        ).await?;
        let id: i64 = row.try_get("id")?;

        t.commit().await?;
        Ok(id)
    }

    pub async fn update_department(&self, d: &Department) -> Result<(), DbError> {
        log::trace!("Store::update_department( {:?} ) called.", d);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if t.query_opt(
            "SELECT id FROM departments WHERE name = $1 AND id <> $2",
            &[&d.name, &d.id]
        ).await?.is_some() {
            return Err(DbError(format!(
                "A department named {:?} already exists.", &d.name
            )));
        }

        let n = t.execute(
            "UPDATE departments SET name = $1 WHERE id = $2",
            &[&d.name, &d.id]
        ).await?;
        if n == 0 {
            return Err(DbError(format!("There is no department with id {}.", &d.id)));
        }

        t.commit().await?;
        Ok(())
    }

    /// Delete a department. Fails if any subjects still belong to it.
    ///
    /// Students in the department are left without one.
    pub async fn delete_department(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_department( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = t.query_one(
            "SELECT COUNT(*) AS n FROM subjects WHERE department = $1",
            &[&id]
        ).await?;
        let n_subjects: i64 = row.try_get("n")?;
        if n_subjects > 0 {
            return Err(DbError(format!(
                "Department {} still has {} subject(s); delete or move them first.",
                &id, &n_subjects
            )));
        }

        t.execute("DELETE FROM schedules WHERE department = $1", &[&id]).await?;
        t.execute(
            "UPDATE students SET department = NULL WHERE department = $1",
            &[&id]
        ).await?;
        let n = t.execute("DELETE FROM departments WHERE id = $1", &[&id]).await?;
        if n == 0 {
            return Err(DbError(format!("There is no department with id {}.", &id)));
        }

        t.commit().await?;
        Ok(())
    }

    /// All subjects, keyed by id.
    pub async fn get_subjects(&self) -> Result<HashMap<i64, Subject>, DbError> {
        log::trace!("Store::get_subjects() called.");

        let client = self.connect().await?;
        let rows = client.query("SELECT * FROM subjects", &[]).await?;

        let mut map: HashMap<i64, Subject> = HashMap::with_capacity(rows.len());
        for row in rows.iter() {
            let s = subject_from_row(row)?;
            map.insert(s.id, s);
        }

        Ok(map)
    }

    pub async fn insert_subject(&self, s: &Subject) -> Result<i64, DbError> {
        log::trace!("Store::insert_subject( {:?} ) called.", s);

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO subjects (name, department, teacher)
                VALUES ($1, $2, $3)
                RETURNING id",
            &[&s.name, &s.department, &s.teacher]
        ).await.map_err(|e| DbError::from(e)
            .annotate(&format!("Unable to insert subject {:?}", &s.name)))?;

        Ok(row.try_get("id")?)
    }

    /// Update a subject. If it moves to another department, its training
    /// schedules move with it.
    pub async fn update_subject(&self, s: &Subject) -> Result<(), DbError> {
        log::trace!("Store::update_subject( {:?} ) called.", s);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let old_dept: i64 = match t.query_opt(
            "SELECT department FROM subjects WHERE id = $1",
            &[&s.id]
        ).await? {
            Some(row) => row.try_get("department")?,
            None => {
                return Err(DbError(format!("There is no subject with id {}.", &s.id)));
            },
        };

        t.execute(
            "UPDATE subjects SET name = $1, department = $2, teacher = $3
                WHERE id = $4",
            &[&s.name, &s.department, &s.teacher, &s.id]
        ).await?;

        if old_dept != s.department {
            let n = t.execute(
                "UPDATE schedules SET department = $1 WHERE subject = $2",
                &[&s.department, &s.id]
            ).await?;
            log::trace!(
                "Moved {} schedules of subject {} from department {} to {}.",
                &n, &s.id, &old_dept, &s.department
            );
        }

        t.commit().await?;
        Ok(())
    }

    /// Delete a subject along with its marks, enrollments, and schedules.
    pub async fn delete_subject(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_subject( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let n_marks = t.execute("DELETE FROM marks WHERE subject = $1", &[&id]).await?;
        let n_enr = t.execute("DELETE FROM enrollments WHERE subject = $1", &[&id]).await?;
        let n_sch = t.execute("DELETE FROM schedules WHERE subject = $1", &[&id]).await?;
        let n = t.execute("DELETE FROM subjects WHERE id = $1", &[&id]).await?;
        if n == 0 {
            return Err(DbError(format!("There is no subject with id {}.", &id)));
        }

        t.commit().await?;
        log::trace!(
            "Deleted subject {} w/ {} marks, {} enrollments, {} schedules.",
            &id, &n_marks, &n_enr, &n_sch
        );
        Ok(())
    }

    /// Enroll `student` in `subject`. Returns `false` if already enrolled.
    pub async fn enroll(&self, student: i64, subject: i64) -> Result<bool, DbError> {
        log::trace!("Store::enroll( {}, {} ) called.", &student, &subject);

        let client = self.connect().await?;
        let n = client.execute(
            "INSERT INTO enrollments (student, subject) VALUES ($1, $2)
                ON CONFLICT DO NOTHING",
            &[&student, &subject]
        ).await?;

        Ok(n == 1)
    }

    /// Enroll each (student, subject) pair. Returns the number of new
    /// enrollments.
    pub async fn enroll_many(&self, pairs: &[(i64, i64)]) -> Result<usize, DbError> {
        log::trace!("Store::enroll_many( [ {} pairs ] ) called.", pairs.len());

        let mut client = self.connect().await?;
        let t = client.transaction().await?;
        let stmt = t.prepare_typed(
            "INSERT INTO enrollments (student, subject) VALUES ($1, $2)
                ON CONFLICT DO NOTHING",
            &[Type::INT8, Type::INT8]
        ).await?;

        let mut n_new: u64 = 0;
        for (student, subject) in pairs.iter() {
            n_new += t.execute(&stmt, &[student, subject]).await?;
        }

        t.commit().await?;
        Ok(n_new as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;

    use crate::tests::{db_tests_enabled, ensure_logging};
    use crate::store::tests::TEST_CONNECTION;

    #[tokio::test]
    #[serial]
    async fn departments_and_subjects() {
        ensure_logging();
        if !db_tests_enabled() { return; }

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let elec = db.insert_department("Electrical").await.unwrap();
        let mech = db.insert_department("Mechanical").await.unwrap();
        assert!(db.insert_department("Electrical").await.is_err());

        let circuits = db.insert_subject(&Subject {
            id: 0, name: "Circuits".to_owned(), department: elec, teacher: None,
        }).await.unwrap();
        let welding = db.insert_subject(&Subject {
            id: 0, name: "Welding".to_owned(), department: mech, teacher: None,
        }).await.unwrap();

        let depts = db.get_departments().await.unwrap();
        assert_eq!(depts[&elec].subjects, vec![circuits]);
        assert_eq!(depts[&mech].subjects, vec![welding]);

        assert!(db.delete_department(elec).await.is_err());
        db.update_department(&Department {
            id: mech, name: "Electrical".to_owned(), subjects: vec![],
        }).await.unwrap_err();

        let mut s = db.get_subjects().await.unwrap().remove(&welding).unwrap();
        s.department = elec;
        db.update_subject(&s).await.unwrap();
        db.delete_department(mech).await.unwrap();

        db.delete_subject(circuits).await.unwrap();
        db.delete_subject(welding).await.unwrap();
        assert!(db.delete_subject(welding).await.is_err());
        db.delete_department(elec).await.unwrap();

        db.nuke_database().await.unwrap();
    }
}
