pub mod attendance_record;
pub mod session_snapshot;
pub mod student;

pub use attendance_record::Entity as AttendanceRecord;
pub use session_snapshot::Entity as SessionSnapshot;
pub use student::Entity as Student;
