pub mod selected_tests_service;
pub mod task_config;
pub mod task_filter;
pub mod task_selection;
pub mod test_file_filter;
pub mod test_task_mapping;
