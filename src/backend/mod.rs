pub mod analyze;
pub mod dump;
pub mod paraver;
