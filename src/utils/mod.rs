pub mod fs_service;
pub mod git_service;
pub mod task_name;
