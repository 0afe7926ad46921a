mod test_support;

use coursectl::commands::restore::{self, RestoreRequest};
use coursectl::restore::RestoreStep;
use coursectl::target::{MergeMode, RestoreTarget, TargetKind};
use coursectl::{db, Error};
use test_support::{content, course_count, module_names, seed_course, site, write_course_archive};

fn request(archive: std::path::PathBuf, course_id: i64, mode: MergeMode) -> RestoreRequest {
    RestoreRequest {
        archive,
        target: RestoreTarget::ExistingCourse { course_id, mode },
    }
}

#[test]
fn adding_keeps_existing_content() {
    let site = site();
    let course = seed_course(
        &site.conn,
        site.category,
        "hist",
        "History",
        &[(0, &[("forum", "Announcements")])],
    );
    let mbz = site.path("extra.mbz");
    write_course_archive(
        &mbz,
        "other",
        "Other course",
        &content(&[(0, &["Timeline"]), (2, &["Essay"])]),
    );

    let out = restore::run(
        &site.conn,
        &site.config,
        &site.admin,
        &request(mbz, course, MergeMode::Add),
    )
    .expect("restore");

    assert_eq!(out.destination.kind, TargetKind::ExistingAdding);
    assert_eq!(out.destination.shortname, "hist");
    assert!(!out.summary.steps.contains(&RestoreStep::DeleteContent));
    assert_eq!(out.summary.plan.sections_created, 1);
    assert_eq!(
        module_names(&site.conn, course),
        vec!["Announcements", "Timeline", "Essay"]
    );
    // Existing-course restores keep the destination's own settings.
    let row = db::get_course(&site.conn, course).expect("query").expect("row");
    assert_eq!(row.shortname, "hist");
    assert_eq!(row.fullname, "History");
    assert_eq!(course_count(&site.conn), 1);
}

#[test]
fn deleting_purges_content_once_before_the_plan() {
    let site = site();
    let course = seed_course(
        &site.conn,
        site.category,
        "bio",
        "Biology",
        &[(0, &[("forum", "Old news")]), (1, &[("quiz", "Old quiz")])],
    );
    let student = db::create_user(&site.conn, "student", false).expect("user");
    db::enrol_user(&site.conn, course, student, "student").expect("enrol");
    db::create_group(&site.conn, course, "Group A").expect("group");

    let mbz = site.path("bio.mbz");
    write_course_archive(&mbz, "bio", "Biology", &content(&[(0, &["Cells"])]));

    let out = restore::run(
        &site.conn,
        &site.config,
        &site.admin,
        &request(mbz, course, MergeMode::Delete),
    )
    .expect("restore");

    assert_eq!(
        out.summary.steps,
        vec![
            RestoreStep::Precheck,
            RestoreStep::DeleteContent,
            RestoreStep::ExecutePlan,
            RestoreStep::RebuildCache
        ]
    );
    assert_eq!(module_names(&site.conn, course), vec!["Cells"]);
    assert_eq!(db::list_sections(&site.conn, course).expect("sections").len(), 1);
    assert_eq!(db::count_enrolments(&site.conn, course).expect("count"), 1);
    assert_eq!(db::count_groups(&site.conn, course).expect("count"), 1);

    let cache = db::get_course_cache(&site.conn, course)
        .expect("query")
        .expect("cache");
    assert!(cache.modinfo.contains("Cells"));
    assert!(!cache.modinfo.contains("Old quiz"));
}

#[test]
fn unknown_course_fails_before_any_change() {
    let site = site();
    let course = seed_course(
        &site.conn,
        site.category,
        "keep",
        "Keep me",
        &[(0, &[("page", "Intro")])],
    );
    let mbz = site.path("x.mbz");
    write_course_archive(&mbz, "x", "X", &content(&[(0, &["Replacement"])]));

    let err = restore::run(
        &site.conn,
        &site.config,
        &site.admin,
        &request(mbz, 9999, MergeMode::Delete),
    )
    .unwrap_err();
    assert!(matches!(err, Error::CourseNotFound(9999)));
    assert_eq!(module_names(&site.conn, course), vec!["Intro"]);
}

#[test]
fn repeated_restores_bump_cache_revision() {
    let site = site();
    let course = seed_course(&site.conn, site.category, "rep", "Repeat", &[]);
    let mbz = site.path("rep.mbz");
    write_course_archive(&mbz, "rep", "Repeat", &content(&[(0, &["Page"])]));

    let first = restore::run(
        &site.conn,
        &site.config,
        &site.admin,
        &request(mbz.clone(), course, MergeMode::Add),
    )
    .expect("first restore");
    let second = restore::run(
        &site.conn,
        &site.config,
        &site.admin,
        &request(mbz, course, MergeMode::Add),
    )
    .expect("second restore");

    assert_eq!(first.summary.cache_rev + 1, second.summary.cache_rev);
    assert_ne!(first.extracted.dir_name, second.extracted.dir_name);
    assert_eq!(module_names(&site.conn, course), vec!["Page", "Page"]);
}
