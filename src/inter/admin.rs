/*!
Subcrate for interoperation with Admin users.
*/
use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    academic::{Department, Subject, TrainingSchedule},
    config::Glob,
    user::*,
};
use super::*;

#[derive(Deserialize)]
struct PasswordReset {
    uname: String,
    password: String,
}

pub async fn api(
    headers: HeaderMap,
    body: Option<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>
) -> Response {

    let u = {
        let glob = glob.read().await;
        match request_user(&headers, &glob) {
            Ok(u) => u,
            Err(r) => { return r; },
        }
    };

    match u {
        User::Admin(_) => { /* Okay, request may proceed. */ },
        _ => {
            return respond_forbidden(
                "Only Admins may make requests here.".to_owned()
            );
        },
    };

    let action = match request_action(&headers) {
        Ok(act) => act,
        Err(r) => { return r; },
    };

    match action {
        "populate-users" => populate_users(glob.clone()).await,
        "populate-admins" => populate_role(glob.clone(), Role::Admin).await,
        "populate-teachers" => populate_role(glob.clone(), Role::Teacher).await,
        "populate-students" => populate_role(glob.clone(), Role::Student).await,
        "add-user" => add_user(body, glob.clone()).await,
        "update-user" => update_user(body, glob.clone()).await,
        "delete-user" => delete_user(&u, body, glob.clone()).await,
        "reset-password" => reset_password(body, glob.clone()).await,
        "upload-students" => upload_students(body, glob.clone()).await,
        "populate-departments" => populate_departments(glob.clone()).await,
        "add-department" => add_department(body, glob.clone()).await,
        "update-department" => update_department(body, glob.clone()).await,
        "delete-department" => delete_department(body, glob.clone()).await,
        "populate-subjects" => populate_subjects(glob.clone()).await,
        "add-subject" => add_subject(body, glob.clone()).await,
        "update-subject" => update_subject(body, glob.clone()).await,
        "delete-subject" => delete_subject(body, glob.clone()).await,
        "populate-marks" => populate_marks(glob.clone()).await,
        "upload-marks" => upload_marks(body, glob.clone()).await,
        "delete-marks" => delete_marks(body, glob.clone()).await,
        "populate-schedules" => populate_schedules(glob.clone()).await,
        "add-schedule" => add_schedule(body, glob.clone()).await,
        "update-schedule" => update_schedule(body, glob.clone()).await,
        "delete-schedule" => delete_schedule(body, glob.clone()).await,
        "change-password" => change_password(&u, body, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognizable x-ojt-action value.", x)
        ),
    }
}

/// Users ordered by role, then name.
fn sorted_users(glob: &Glob, role: Option<Role>) -> Vec<&User> {
    let mut users: Vec<&User> = glob.users.values()
        .filter(|u| match role {
            Some(r) => u.role() == r,
            None => true,
        })
        .collect();
    users.sort_by(|a, b| (a.role(), a.name()).cmp(&(b.role(), b.name())));
    users
}

async fn populate_role(glob: Arc<RwLock<Glob>>, role: Role) -> Response {
    log::trace!("populate_role( Glob, {:?} ) called.", &role);

    let glob = glob.read().await;
    action_response("populate-users", &sorted_users(&glob, Some(role)))
}

async fn populate_users(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_users( Glob ) called.");

    let glob = glob.read().await;
    action_response("populate-users", &sorted_users(&glob, None))
}

async fn refresh_users(glob: &Arc<RwLock<Glob>>) -> Result<(), Response> {
    glob.write().await.refresh_users().await.map_err(|e| {
        log::error!("Error refreshing user hash from database: {}", &e);
        text_500(Some("Unable to reread users from database.".to_owned()))
    })
}

async fn refresh_all(glob: &Arc<RwLock<Glob>>) -> Result<(), Response> {
    glob.write().await.refresh_all().await.map_err(|e| {
        log::error!("Error refreshing cached data from database: {}", &e);
        text_500(Some("Unable to reread data from database.".to_owned()))
    })
}

async fn add_user(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let u: NewUser = match json_body(body) {
        Ok(u) => u,
        Err(r) => { return r; },
    };
    if let Err(e) = u.validate() {
        return respond_bad_request(e);
    }

    {
        let glob = glob.read().await;
        if let Err(e) = glob.insert_user(&u).await {
            log::warn!(
                "Error inserting new user ({:?}) into database: {}",
                &u, &e,
            );
            return respond_glob_error(e);
        }
    }
    if let Err(r) = refresh_users(&glob).await {
        return r;
    }

    populate_users(glob).await
}

async fn update_user(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let u: User = match json_body(body) {
        Ok(u) => u,
        Err(r) => { return r; },
    };
    if u.name().trim().is_empty() {
        return respond_bad_request("Name must not be blank.".to_owned());
    }

    {
        let glob = glob.read().await;
        if let Err(e) = glob.update_user(&u).await {
            log::warn!("Error updating user {:?}: {}", &u, &e);
            return respond_glob_error(e);
        }
    }
    // Teacher updates reassign subjects.
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_users(glob).await
}

async fn delete_user(
    requester: &User,
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let uname = match require_body(body, "uname") {
        Ok(uname) => uname.trim().to_owned(),
        Err(r) => { return r; },
    };
    if uname == requester.email() {
        return respond_bad_request("You may not delete yourself.".to_owned());
    }

    {
        let glob = glob.read().await;
        if let Err(e) = glob.delete_user(&uname).await {
            log::warn!("Error deleting user {:?}: {}", &uname, &e);
            return respond_glob_error(e);
        }
    }
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_users(glob).await
}

async fn reset_password(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let pr: PasswordReset = match json_body(body) {
        Ok(pr) => pr,
        Err(r) => { return r; },
    };

    if let Err(e) = glob.read().await.reset_password(&pr.uname, &pr.password).await {
        log::warn!("Error resetting password for {:?}: {}", &pr.uname, &e);
        return respond_glob_error(e);
    }

    action_response("reset-password", &json!({ "uname": &pr.uname }))
}

async fn upload_students(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match require_body(body, "CSV") {
        Ok(body) => body,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if let Err(e) = glob.upload_students(&body).await {
            log::warn!(
                "Error uploading new students via CSV: {}\n\nCSV text:\n\n{}\n",
                &e, &body
            );
            return respond_glob_error(e);
        }
    }
    if let Err(r) = refresh_users(&glob).await {
        return r;
    }

    populate_users(glob).await
}

//
//
// This section is for dealing with DEPARTMENTS and SUBJECTS.
//
//

async fn populate_departments(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_departments( Glob ) called.");

    let glob = glob.read().await;
    let mut depts: Vec<&Department> = glob.departments.values().collect();
    depts.sort_by(|a, b| a.name.cmp(&b.name));

    action_response("populate-departments", &depts)
}

async fn add_department(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let d: Department = match json_body(body) {
        Ok(d) => d,
        Err(r) => { return r; },
    };
    let name = d.name.trim();

    {
        let glob = glob.read().await;
        if let Err(e) = check_department_name(&glob, None, name) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.insert_department(name).await;
        if let Err(e) = res {
            log::error!("Error inserting department {:?}: {}", name, &e);
            return text_500(Some(e.to_string()));
        }
    }
    if let Err(e) = glob.write().await.refresh_departments().await {
        log::error!("Error refreshing departments from database: {}", &e);
        return text_500(Some("Unable to reread departments from database.".to_owned()));
    }

    populate_departments(glob).await
}

async fn update_department(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let mut d: Department = match json_body(body) {
        Ok(d) => d,
        Err(r) => { return r; },
    };
    d.name = d.name.trim().to_owned();

    {
        let glob = glob.read().await;
        if !glob.departments.contains_key(&d.id) {
            return respond_bad_request(format!("There is no department with id {}.", &d.id));
        }
        if let Err(e) = check_department_name(&glob, Some(d.id), &d.name) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.update_department(&d).await;
        if let Err(e) = res {
            log::error!("Error updating department {:?}: {}", &d, &e);
            return text_500(Some(e.to_string()));
        }
    }
    if let Err(e) = glob.write().await.refresh_departments().await {
        log::error!("Error refreshing departments from database: {}", &e);
        return text_500(Some("Unable to reread departments from database.".to_owned()));
    }

    populate_departments(glob).await
}

async fn delete_department(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if !glob.departments.contains_key(&id) {
            return respond_bad_request(format!("There is no department with id {}.", &id));
        }
        let n_subjects = glob.subjects.values().filter(|s| s.department == id).count();
        if n_subjects > 0 {
            return respond_bad_request(format!(
                "Department {} still has {} subject(s); delete or move them first.",
                &id, &n_subjects
            ));
        }
        let res = glob.data().read().await.delete_department(id).await;
        if let Err(e) = res {
            log::error!("Error deleting department {}: {}", &id, &e);
            return text_500(Some(e.to_string()));
        }
    }
    // Students of the department are left without one.
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_departments(glob).await
}

async fn populate_subjects(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_subjects( Glob ) called.");

    let glob = glob.read().await;
    let mut subjects: Vec<&Subject> = glob.subjects.values().collect();
    subjects.sort_by(|a, b| (a.department, &a.name).cmp(&(b.department, &b.name)));

    action_response("populate-subjects", &subjects)
}

/// Ensure a department name is not blank and not taken by a department
/// other than `id`.
fn check_department_name(glob: &Glob, id: Option<i64>, name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Department name must not be blank.".to_owned());
    }
    match glob.department_by_name(name) {
        Some(d) if Some(d.id) != id => {
            Err(format!("A department named {:?} already exists.", name))
        },
        _ => Ok(()),
    }
}

/// Ensure a subject's department exists, its name is unique within that
/// department, and its teacher (if any) is a Teacher.
fn check_subject(glob: &Glob, s: &Subject) -> Result<(), String> {
    s.validate()?;
    if !glob.departments.contains_key(&s.department) {
        return Err(format!("There is no department with id {}.", &s.department));
    }
    if glob.subjects.values()
        .any(|x| x.id != s.id && x.department == s.department && x.name == s.name)
    {
        return Err(format!(
            "Department {} already has a subject named {:?}.", &s.department, &s.name
        ));
    }
    if let Some(t) = s.teacher {
        match glob.user_by_id(t) {
            Some(User::Teacher(_)) => {},
            _ => { return Err(format!("There is no Teacher with id {}.", &t)); },
        }
    }
    Ok(())
}

async fn add_subject(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let mut s: Subject = match json_body(body) {
        Ok(s) => s,
        Err(r) => { return r; },
    };
    s.name = s.name.trim().to_owned();

    {
        let glob = glob.read().await;
        if let Err(e) = check_subject(&glob, &s) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.insert_subject(&s).await;
        if let Err(e) = res {
            log::error!("Error inserting subject {:?}: {}", &s, &e);
            return text_500(Some(e.to_string()));
        }
    }
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_subjects(glob).await
}

async fn update_subject(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let mut s: Subject = match json_body(body) {
        Ok(s) => s,
        Err(r) => { return r; },
    };
    s.name = s.name.trim().to_owned();

    {
        let glob = glob.read().await;
        if !glob.subjects.contains_key(&s.id) {
            return respond_bad_request(format!("There is no subject with id {}.", &s.id));
        }
        if let Err(e) = check_subject(&glob, &s) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.update_subject(&s).await;
        if let Err(e) = res {
            log::error!("Error updating subject {:?}: {}", &s, &e);
            return text_500(Some(e.to_string()));
        }
    }
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_subjects(glob).await
}

async fn delete_subject(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if !glob.subjects.contains_key(&id) {
            return respond_bad_request(format!("There is no subject with id {}.", &id));
        }
        let res = glob.data().read().await.delete_subject(id).await;
        if let Err(e) = res {
            log::error!("Error deleting subject {}: {}", &id, &e);
            return text_500(Some(e.to_string()));
        }
    }
    if let Err(r) = refresh_all(&glob).await {
        return r;
    }

    populate_subjects(glob).await
}

//
//
// This section is for dealing with MARKS.
//
//

async fn populate_marks(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_marks( Glob ) called.");

    let res = glob.read().await.data().read().await.get_all_marks().await;
    match res {
        Ok(marks) => action_response("populate-marks", &marks),
        Err(e) => {
            log::error!("Error retrieving marks from database: {}", &e);
            text_500(Some("Unable to retrieve marks from database.".to_owned()))
        },
    }
}

async fn upload_marks(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match require_body(body, "CSV") {
        Ok(body) => body,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if let Err(e) = glob.upload_marks(&body, None).await {
            log::warn!(
                "Error uploading marks via CSV: {}\n\nCSV text:\n\n{}\n",
                &e, &body
            );
            return respond_glob_error(e);
        }
    }
    // New enrollments.
    if let Err(r) = refresh_users(&glob).await {
        return r;
    }

    populate_marks(glob).await
}

async fn delete_marks(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };

    if let Err(e) = glob.read().await.delete_mark(id, None).await {
        log::warn!("Error deleting mark {}: {}", &id, &e);
        return respond_glob_error(e);
    }

    populate_marks(glob).await
}

//
//
// This section is for dealing with TRAINING SCHEDULES.
//
//

async fn populate_schedules(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_schedules( Glob ) called.");

    let res = glob.read().await.data().read().await.get_schedules().await;
    match res {
        Ok(schedules) => action_response("populate-schedules", &schedules),
        Err(e) => {
            log::error!("Error retrieving schedules from database: {}", &e);
            text_500(Some("Unable to retrieve schedules from database.".to_owned()))
        },
    }
}

/// Fill in default class dates and ensure the schedule's subject belongs
/// to its department.
fn prepare_schedule(glob: &Glob, s: &mut TrainingSchedule) -> Result<(), String> {
    s.check_duration()?;
    s.fill_class_dates();
    s.validate()?;
    match glob.subjects.get(&s.subject) {
        None => Err(format!("There is no subject with id {}.", &s.subject)),
        Some(subj) if subj.department != s.department => Err(format!(
            "Subject {:?} does not belong to department {}.",
            &subj.name, &s.department
        )),
        Some(_) => Ok(()),
    }
}

async fn add_schedule(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let mut s: TrainingSchedule = match json_body(body) {
        Ok(s) => s,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if let Err(e) = prepare_schedule(&glob, &mut s) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.insert_schedule(&s).await;
        if let Err(e) = res {
            log::error!("Error inserting schedule {:?}: {}", &s, &e);
            return text_500(Some(e.to_string()));
        }
    }

    populate_schedules(glob).await
}

async fn update_schedule(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let mut s: TrainingSchedule = match json_body(body) {
        Ok(s) => s,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if let Err(e) = prepare_schedule(&glob, &mut s) {
            return respond_bad_request(e);
        }
        let res = glob.data().read().await.update_schedule(&s).await;
        if let Err(e) = res {
            log::error!("Error updating schedule {:?}: {}", &s, &e);
            return text_500(Some(e.to_string()));
        }
    }

    populate_schedules(glob).await
}

async fn delete_schedule(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        let res = glob.data().read().await.delete_schedule(id).await;
        if let Err(e) = res {
            log::error!("Error deleting schedule {}: {}", &id, &e);
            return text_500(Some(e.to_string()));
        }
    }

    populate_schedules(glob).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_glob;
    use crate::inter::tests::headers;

    use time::macros::date;

    #[test]
    fn users_sorted_by_role_then_name() {
        let glob = sample_glob();
        let names: Vec<&str> = sorted_users(&glob, None).iter()
            .map(|u| u.name())
            .collect();
        assert_eq!(names, vec!["Admin", "Mr Berro", "Asha Nair", "Ben Okafor"]);
        assert_eq!(sorted_users(&glob, Some(Role::Student)).len(), 2);
    }

    #[test]
    fn subject_checks() {
        let glob = sample_glob();
        let mut s = Subject {
            id: 0, name: "Drafting".to_owned(), department: 2, teacher: Some(100),
        };
        assert!(check_subject(&glob, &s).is_ok());
        s.teacher = Some(200);
        assert!(check_subject(&glob, &s).is_err());
        s.teacher = None;
        s.department = 9;
        assert!(check_subject(&glob, &s).is_err());
    }

    #[test]
    fn schedule_checks() {
        let glob = sample_glob();
        let mut s = TrainingSchedule {
            id: 0, subject: 10, department: 1,
            start: date!(2024-03-04), duration: 7, class_dates: vec![],
        };
        prepare_schedule(&glob, &mut s).unwrap();
        assert_eq!(s.class_dates.len(), 5);

        s.department = 2;
        assert!(prepare_schedule(&glob, &mut s).is_err());
        s.subject = 99;
        assert!(prepare_schedule(&glob, &mut s).is_err());

        let mut huge = TrainingSchedule {
            id: 0, subject: 10, department: 1,
            start: date!(2024-03-04), duration: i32::MAX, class_dates: vec![],
        };
        assert!(prepare_schedule(&glob, &mut huge).is_err());
        assert!(huge.class_dates.is_empty());
    }

    fn shared() -> Arc<RwLock<Glob>> {
        Arc::new(RwLock::new(sample_glob()))
    }

    #[tokio::test]
    async fn only_admins_get_in() {
        let glob = shared();

        for uname in ["berro@example.org", "asha@example.org"] {
            let mut h = headers(&[("x-ojt-action", "populate-users")]);
            h.insert("x-ojt-uname", HeaderValue::from_static(uname));
            let r = api(h, None, Extension(glob.clone())).await;
            assert_eq!(r.status(), StatusCode::FORBIDDEN);
        }

        let h = headers(&[
            ("x-ojt-uname", "admin@example.org"),
            ("x-ojt-action", "populate-users"),
        ]);
        let r = api(h, None, Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::OK);

        let h = headers(&[
            ("x-ojt-uname", "admin@example.org"),
            ("x-ojt-action", "subject-report"),
        ]);
        let r = api(h, None, Extension(glob)).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_writes_refused_as_bad_requests() {
        let glob = shared();
        let admin = glob.read().await.users["admin@example.org"].clone();

        let body = json!({
            "email": "asha@example.org",
            "name": "Another Asha",
            "role": "Student",
            "password": "pw",
            "student_id": "OJT777",
            "department": 1,
        }).to_string();
        let r = add_user(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let body = json!({
            "email": "new@example.org",
            "name": "New Student",
            "role": "Student",
            "password": "pw",
            "student_id": "OJT002",
        }).to_string();
        let r = add_user(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let body = json!({
            "email": "new@example.org",
            "name": "New Student",
            "role": "Student",
            "password": "pw",
            "student_id": "OJT777",
            "department": 9,
        }).to_string();
        let r = add_user(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let csv = "OJT777, Chen Wei, chen@example.org, Culinary\n".to_owned();
        let r = upload_students(Some(csv), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let csv = "OJT001, Asha Again, asha2@example.org, Electrical\n".to_owned();
        let r = upload_students(Some(csv), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let r = delete_user(&admin, Some("admin@example.org".to_owned()), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = delete_user(&admin, Some("nobody@example.org".to_owned()), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let body = json!({ "uname": "nobody@example.org", "password": "pw" }).to_string();
        let r = reset_password(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let csv = "OJT001, Circuits, 2024-03-04, 30, 20\n".to_owned();
        let r = upload_marks(Some(csv), glob).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn department_and_subject_writes_checked() {
        let glob = shared();

        let r = add_department(Some(json!({ "name": " Electrical " }).to_string()), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let body = json!({ "id": 2, "name": "Electrical" }).to_string();
        let r = update_department(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let body = json!({ "id": 9, "name": "Culinary" }).to_string();
        let r = update_department(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = delete_department(Some("1".to_owned()), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = delete_department(Some("9".to_owned()), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let body = json!({ "name": "Circuits", "department": 1 }).to_string();
        let r = add_subject(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let body = json!({ "id": 99, "name": "Drafting", "department": 1 }).to_string();
        let r = update_subject(Some(body), glob.clone()).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = delete_subject(Some("99".to_owned()), glob).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }
}
