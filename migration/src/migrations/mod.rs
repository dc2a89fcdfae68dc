pub mod m202601150001_create_students;
pub mod m202601150002_create_attendance_records;
pub mod m202601150003_create_session_snapshots;
