/*!
`Store` methods et. al. for dealing with the different kinds of users.

Teachers have no table of their own: the subjects they're assigned are the
rows of `subjects` whose `teacher` column holds their id.
*/
use std::collections::HashMap;
use std::fmt::Write;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{Row, Transaction, types::{ToSql, Type}};

use super::{Store, DbError};
use crate::user::*;

fn base_user_from_row(row: &Row) -> Result<BaseUser, DbError> {
    log::trace!("base_user_from_row( {:?} ) called", row);

    let role_str: &str = row.try_get("role")?;
    let bu = BaseUser {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: role_str.parse()?,
        name: row.try_get("name")?,
    };

    Ok(bu)
}

/// Return the role of extant user `email`, if one exists.
///
/// This is used when inserting new users to ensure good error messaging
/// when an email address is already in use.
async fn check_existing_user_role(
    t: &Transaction<'_>,
    email: &str,
) -> Result<Option<Role>, DbError> {
    log::trace!("check_existing_user_role( T, {:?} ) called.", email);

    match t.query_opt(
        "SELECT role FROM users WHERE email = $1",
        &[&email]
    ).await.map_err(|e|
        DbError::from(e).annotate("Error querying for preexisting email")
    )? {
        None => Ok(None),
        Some(row) => {
            let role_str: &str = row.try_get("role")?;
            let role: Role = role_str.parse()
                .map_err(|e: String|
                    DbError(e).annotate("Error parsing role of preexisting email")
                )?;
            Ok(Some(role))
        },
    }
}

async fn check_existing_student_id(
    t: &Transaction<'_>,
    student_id: &str,
) -> Result<(), DbError> {
    if t.query_opt(
        "SELECT uid FROM students WHERE student_id = $1",
        &[&student_id]
    ).await?.is_some() {
        return Err(DbError(format!(
            "Student id {:?} is already in use.", student_id
        )));
    }
    Ok(())
}

impl Store {

    /// Inserts the `user::BaseUser` information into the `users` table and
    /// returns the new user's id.
    ///
    /// Throws a propagable error if the given email already exists.
    async fn insert_base_user(
        &self,
        t: &Transaction<'_>,
        email: &str,
        name: &str,
        role: Role,
    ) -> Result<i64, DbError> {
        log::trace!(
            "insert_base_user( T, {:?}, {:?}, {} ) called.",
            email, name, role
        );

        if let Some(role) = check_existing_user_role(t, email).await? {
            return Err(DbError(format!(
                "Email {} already in use by a user with role {}.",
                email, &role
            )));
        }

        let row = t.query_one(
            "INSERT INTO users (email, role, name)
                VALUES ($1, $2, $3)
                RETURNING id",
            &[&email, &role.to_string(), &name]
        ).await?;

        Ok(row.try_get("id")?)
    }

    pub async fn insert_admin(
        &self,
        email: &str,
        name: &str,
    ) -> Result<i64, DbError> {
        log::trace!("Store::insert_admin( {:?}, {:?} ) called.", email, name);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let id = self.insert_base_user(&t, email, name, Role::Admin).await?;

        t.commit().await?;
        log::trace!("Inserted Admin {:?} ({}).", email, id);
        Ok(id)
    }

    pub async fn insert_teacher(
        &self,
        email: &str,
        name: &str,
    ) -> Result<i64, DbError> {
        log::trace!("Store::insert_teacher( {:?}, {:?} ) called.", email, name);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let id = self.insert_base_user(&t, email, name, Role::Teacher).await?;

        t.commit().await?;
        log::trace!("Inserted Teacher {:?} ({}).", email, id);
        Ok(id)
    }

    pub async fn insert_student(
        &self,
        email: &str,
        name: &str,
        student_id: &str,
        department: Option<i64>,
    ) -> Result<i64, DbError> {
        log::trace!(
            "Store::insert_student( {:?}, {:?}, {:?}, {:?} ) called.",
            email, name, student_id, &department
        );

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        check_existing_student_id(&t, student_id).await?;
        let id = self.insert_base_user(&t, email, name, Role::Student).await?;
        t.execute(
            "INSERT INTO students (uid, student_id, department)
                VALUES ($1, $2, $3)",
            &[&id, &student_id, &department]
        ).await?;

        t.commit().await?;
        log::trace!("Inserted Student {:?} ({}).", student_id, id);
        Ok(id)
    }

    /**
    Insert a batch of students in a single transaction.

    Each `StudentRecord` is paired with the id of its department, already
    resolved from the department name. Fails without inserting anything if
    any email or student id is already in use.
    */
    pub async fn insert_students(
        &self,
        students: &[(&StudentRecord, Option<i64>)],
    ) -> Result<usize, DbError> {
        log::trace!("Store::insert_students( [ {} students ] ) called.", students.len());

        let new_emails: Vec<&str> = students.iter()
            .map(|(s, _)| s.email.as_str())
            .collect();
        let new_student_ids: Vec<&str> = students.iter()
            .map(|(s, _)| s.student_id.as_str())
            .collect();

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let (eq, sq) = tokio::join!(
            t.prepare_typed(
                "SELECT email, role FROM users WHERE email = ANY($1)",
                &[Type::TEXT_ARRAY]
            ),
            t.prepare_typed(
                "SELECT student_id FROM students WHERE student_id = ANY($1)",
                &[Type::TEXT_ARRAY]
            ),
        );
        let (preexisting_email_query, preexisting_sid_query) = (eq?, sq?);

        // Check to see if any of the new students have emails or student ids
        // already in use and return an informative error if so.
        let preexisting_email_rows = t.query(
            &preexisting_email_query,
            &[&new_emails]
        ).await?;
        let preexisting_sid_rows = t.query(
            &preexisting_sid_query,
            &[&new_student_ids]
        ).await?;
        if !preexisting_email_rows.is_empty() || !preexisting_sid_rows.is_empty() {
            let mut estr = String::from("Database already contains:");
            for row in preexisting_email_rows.iter() {
                let email: &str = row.try_get("email")?;
                let role: &str = row.try_get("role")?;
                let _ = write!(&mut estr, "\n  email {} ({})", email, role);
            }
            for row in preexisting_sid_rows.iter() {
                let sid: &str = row.try_get("student_id")?;
                let _ = write!(&mut estr, "\n  student id {}", sid);
            }
            return Err(DbError(estr));
        }

        let (buiq, stiq) = tokio::join!(
            t.prepare_typed(
                "INSERT INTO users (email, role, name)
                    VALUES ($1, $2, $3)
                    RETURNING id",
                &[Type::TEXT, Type::TEXT, Type::TEXT]
            ),
            t.prepare_typed(
                "INSERT INTO students (uid, student_id, department)
                    VALUES ($1, $2, $3)",
                &[Type::INT8, Type::TEXT, Type::INT8]
            ),
        );
        let (base_user_insert_query, student_table_insert_query) = (buiq?, stiq?);

        /*
        The insert parameters have to be slices of references that outlive
        the futures in `inserts`, so they're all built up front. Each future
        carries its index so the returned ids can be matched back up with
        their students.
        */
        let mut ids: Vec<i64> = vec![0; students.len()];
        {
            let student_role = Role::Student.to_string();
            let pvec: Vec<[&(dyn ToSql + Sync); 3]> = students.iter()
                .map(|(s, _)| {
                    let p: [&(dyn ToSql + Sync); 3] =
                        [&s.email, &student_role, &s.name];
                    p
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for (n, params) in pvec.iter().enumerate() {
                let t = &t;
                let stmt = &base_user_insert_query;
                inserts.push(async move {
                    (n, t.query_one(stmt, params).await)
                });
            }

            while let Some((n, res)) = inserts.next().await {
                match res {
                    Ok(row) => { ids[n] = row.try_get("id")?; },
                    Err(e) => {
                        return Err(DbError::from(e)
                            .annotate("Error inserting base user into database"));
                    },
                }
            }
        }

        let mut n_stud_inserted: u64 = 0;
        {
            let pvec: Vec<[&(dyn ToSql + Sync); 3]> = students.iter()
                .zip(ids.iter())
                .map(|((s, dept), id)| {
                    let p: [&(dyn ToSql + Sync); 3] = [id, &s.student_id, dept];
                    p
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&student_table_insert_query, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_stud_inserted += 1; },
                    Err(e) => {
                        return Err(DbError::from(e)
                            .annotate("Error inserting into students table"));
                    },
                }
            }
        }

        t.commit().await?;

        log::trace!("Inserted {} students.", &n_stud_inserted);
        Ok(n_stud_inserted as usize)
    }

    /**
    Update the mutable parts of a user: name for everyone, student id,
    department and enrollments for students, and the set of assigned
    subjects for teachers.

    Emails are the login names in the auth DB and can't be changed here.
    */
    pub async fn update_user(&self, u: &User) -> Result<(), DbError> {
        log::trace!("Store::update_user( {:?} ) called.", u);

        let id = u.id();
        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let n = t.execute(
            "UPDATE users SET name = $1 WHERE id = $2 AND email = $3 AND role = $4",
            &[&u.name(), &id, &u.email(), &u.role().to_string()]
        ).await?;
        if n == 0 {
            return Err(DbError(format!(
                "There is no {} with id {} and email {:?}.",
                &u.role(), &id, u.email()
            )));
        }

        match u {
            User::Admin(_) => {},
            User::Teacher(tch) => {
                t.execute(
                    "UPDATE subjects SET teacher = NULL
                        WHERE teacher = $1 AND NOT (id = ANY($2))",
                    &[&id, &tch.subjects]
                ).await?;
                let n = t.execute(
                    "UPDATE subjects SET teacher = $1 WHERE id = ANY($2)",
                    &[&id, &tch.subjects]
                ).await?;
                if (n as usize) < tch.subjects.len() {
                    return Err(DbError(format!(
                        "Not all of the subjects {:?} exist.", &tch.subjects
                    )));
                }
            },
            User::Student(s) => {
                if let Some(row) = t.query_opt(
                    "SELECT uid FROM students WHERE student_id = $1 AND uid <> $2",
                    &[&s.student_id, &id]
                ).await? {
                    let other: i64 = row.try_get("uid")?;
                    return Err(DbError(format!(
                        "Student id {:?} is already in use by user {}.",
                        &s.student_id, &other
                    )));
                }
                t.execute(
                    "UPDATE students SET student_id = $1, department = $2
                        WHERE uid = $3",
                    &[&s.student_id, &s.department, &id]
                ).await?;
                t.execute(
                    "DELETE FROM enrollments
                        WHERE student = $1 AND NOT (subject = ANY($2))",
                    &[&id, &s.subjects]
                ).await?;
                let stmt = t.prepare_typed(
                    "INSERT INTO enrollments (student, subject) VALUES ($1, $2)
                        ON CONFLICT DO NOTHING",
                    &[Type::INT8, Type::INT8]
                ).await?;
                for subj in s.subjects.iter() {
                    t.execute(&stmt, &[&id, subj]).await?;
                }
            },
        }

        t.commit().await?;
        Ok(())
    }

    /**
    Deletes a user from the database, regardless of role, returning the
    deleted user's email.

    Like the student rows, the student's marks and enrollments go with them;
    subjects the user taught are left without a teacher.
    */
    pub async fn delete_user(&self, id: i64) -> Result<String, DbError> {
        log::trace!("Store::delete_user( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let params: [&(dyn ToSql + Sync); 1] = [&id];

        let (m_del_res, e_del_res, s_upd_res) = tokio::join!(
            t.execute("DELETE FROM marks WHERE student = $1", &params[..]),
            t.execute("DELETE FROM enrollments WHERE student = $1", &params[..]),
            t.execute("UPDATE subjects SET teacher = NULL WHERE teacher = $1", &params[..]),
        );
        let (n_marks, n_enrollments, n_subjects) = (m_del_res?, e_del_res?, s_upd_res?);
        log::trace!(
            "User {}: {} marks, {} enrollments deleted; {} subjects unassigned.",
            &id, &n_marks, &n_enrollments, &n_subjects
        );

        t.execute("DELETE FROM students WHERE uid = $1", &[&id]).await?;

        let row = t.query_opt(
            "DELETE FROM users WHERE id = $1 RETURNING email",
            &[&id]
        ).await?;

        match row {
            None => Err(DbError(format!("There is no user with id {}.", &id))),
            Some(row) => {
                let email: String = row.try_get("email")?;
                t.commit().await?;
                Ok(email)
            },
        }
    }

    /// All users, keyed by email.
    pub async fn get_users(&self) -> Result<HashMap<String, User>, DbError> {
        log::trace!("Store::get_users() called.");

        let client = self.connect().await?;
        let (u_res, s_res, e_res, t_res) = tokio::join!(
            client.query("SELECT * FROM users", &[]),
            client.query("SELECT uid, student_id, department FROM students", &[]),
            client.query("SELECT student, subject FROM enrollments ORDER BY subject", &[]),
            client.query(
                "SELECT id, teacher FROM subjects WHERE teacher IS NOT NULL ORDER BY id",
                &[]
            ),
        );
        let (user_rows, student_rows, enroll_rows, teach_rows) = (u_res?, s_res?, e_res?, t_res?);

        let mut student_info: HashMap<i64, (String, Option<i64>)> =
            HashMap::with_capacity(student_rows.len());
        for row in student_rows.iter() {
            student_info.insert(
                row.try_get("uid")?,
                (row.try_get("student_id")?, row.try_get("department")?)
            );
        }

        let mut enrolled: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in enroll_rows.iter() {
            enrolled.entry(row.try_get("student")?)
                .or_default()
                .push(row.try_get("subject")?);
        }

        let mut taught: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in teach_rows.iter() {
            taught.entry(row.try_get("teacher")?)
                .or_default()
                .push(row.try_get("id")?);
        }

        let mut map: HashMap<String, User> = HashMap::with_capacity(user_rows.len());
        for row in user_rows.iter() {
            let base = base_user_from_row(row)?;
            let u = match base.role {
                Role::Admin => base.into_admin(),
                Role::Teacher => {
                    let subjects = taught.remove(&base.id).unwrap_or_default();
                    base.into_teacher(subjects)
                },
                Role::Student => match student_info.remove(&base.id) {
                    Some((student_id, department)) => {
                        let subjects = enrolled.remove(&base.id).unwrap_or_default();
                        base.into_student(student_id, department, subjects)
                    },
                    None => {
                        log::error!(
                            "User {} ({}) has role Student but no students row; skipping.",
                            &base.id, &base.email
                        );
                        continue;
                    },
                },
            };
            map.insert(u.email().to_owned(), u);
        }

        Ok(map)
    }
}
