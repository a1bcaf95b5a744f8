pub mod decisions;
pub mod error;
pub mod extract;
pub mod instance;
pub mod network;
pub mod route;
pub mod solution;
pub mod timetable;
pub mod trains;
