/*!
Portal users.

Every user has a row in the data DB `users` table (`BaseUser`); students
have additional information. Passwords live in the auth DB and never pass
through these types except on their way in (`NewUser`, `StudentRecord`).
*/
use std::io::Read;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin   => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin"   => Ok(Role::Admin),
            "Teacher" => Ok(Role::Teacher),
            "Student" => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BaseUser {
    pub id: i64,
    /// Unique; also the login name.
    pub email: String,
    pub role: Role,
    pub name: String,
}

impl BaseUser {
    pub fn into_admin(self) -> User { User::Admin(self) }
    pub fn into_teacher(self, subjects: Vec<i64>) -> User {
        User::Teacher(Teacher { base: self, subjects })
    }
    pub fn into_student(
        self,
        student_id: String,
        department: Option<i64>,
        subjects: Vec<i64>,
    ) -> User {
        User::Student(Student { base: self, student_id, department, subjects })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Teacher {
    pub base: BaseUser,
    /// ids of the `Subject`s this teacher is assigned.
    #[serde(default)]
    pub subjects: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Student {
    pub base: BaseUser,
    /// Institutional student number; unique.
    pub student_id: String,
    pub department: Option<i64>,
    /// ids of the `Subject`s this student is enrolled in.
    #[serde(default)]
    pub subjects: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum User {
    Admin(BaseUser),
    Teacher(Teacher),
    Student(Student),
}

impl User {
    pub fn id(&self) -> i64 {
        self.base().id
    }

    pub fn email(&self) -> &str {
        &self.base().email
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn role(&self) -> Role {
        match self {
            User::Admin(_) => Role::Admin,
            User::Teacher(_) => Role::Teacher,
            User::Student(_) => Role::Student,
        }
    }

    pub fn base(&self) -> &BaseUser {
        match self {
            User::Admin(base) => base,
            User::Teacher(t) => &t.base,
            User::Student(s) => &s.base,
        }
    }
}

/// Body of an admin "add-user" request.
#[derive(Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: String,
    /// Required for students.
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub department: Option<i64>,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("password", &"[ redacted ]")
            .field("student_id", &self.student_id)
            .field("department", &self.department)
            .finish()
    }
}

fn check_email(email: &str) -> Result<(), String> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(format!("{:?} is not a valid email address.", email)),
    }
}

impl NewUser {
    pub fn validate(&self) -> Result<(), String> {
        check_email(&self.email)?;
        if self.name.trim().is_empty() {
            return Err("Name must not be blank.".to_owned());
        }
        if self.password.is_empty() {
            return Err("Password must not be blank.".to_owned());
        }
        if self.role == Role::Student {
            match self.student_id.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err("Students require a student_id.".to_owned());
                },
                _ => {},
            }
        }
        Ok(())
    }
}

/// One student read from a bulk upload.
#[derive(Clone)]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    pub email: String,
    /// Department _name_; resolved to an id before insertion.
    pub department: Option<String>,
    pub password: String,
}

impl std::fmt::Debug for StudentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("StudentRecord")
            .field("student_id", &self.student_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("department", &self.department)
            .finish_non_exhaustive()
    }
}

impl StudentRecord {
    /**
    Student .csv rows should look like this

    ```csv
    #student_id, name,        email,              department,  password
    OJT001,      Asha Nair,   asha@example.org,   Electrical,  s3cret
    OJT002,      Ben Okafor,  ben@example.org,    Mechanical
    ```

    The password column is optional; a student without one gets their
    student id as a password. A blank department means none.
    */
    pub fn from_csv_line(
        row: &csv::StringRecord
    ) -> Result<StudentRecord, &'static str> {
        log::trace!("StudentRecord::from_csv_line( {:?} ) called.", row);

        let student_id = match row.get(0) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no student id"); },
        };
        let name = match row.get(1) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no name"); },
        };
        let email = match row.get(2) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => { return Err("no email address"); },
        };
        if check_email(&email).is_err() {
            return Err("malformed email address");
        }
        let department = match row.get(3) {
            Some(s) if !s.is_empty() => Some(s.to_owned()),
            _ => None,
        };
        let password = match row.get(4) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => student_id.clone(),
        };

        Ok(StudentRecord { student_id, name, email, department, password })
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<StudentRecord>, String> {
        log::trace!("StudentRecord::vec_from_csv_reader(...) called.");

        let mut csv_reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .has_headers(false)
            .from_reader(r);

        let mut students: Vec<StudentRecord> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            match res {
                Ok(record) => match StudentRecord::from_csv_line(&record) {
                    Ok(stud) => { students.push(stud); },
                    Err(e) => {
                        let estr = match record.position() {
                            Some(p) => format!(
                                "Error on line {}: {}",
                                p.line(), &e
                            ),
                            None => format!(
                                "Error in CSV record {}: {}", &n, &e
                            ),
                        };
                        return Err(estr);
                    },
                },
                Err(e) => {
                    let estr = match e.position() {
                        Some(p) => format!(
                            "Error on line {}: {}", p.line(), &e
                        ),
                        None => format!(
                            "Error in CSV record {}: {}", &n, &e
                        ),
                    };
                    return Err(estr);
                }
            }
        }

        log::trace!(
            "StudentRecord::vec_from_csv_reader() returns {} records.",
            students.len()
        );
        Ok(students)
    }
}
