pub mod generated_suite;
pub mod selected_sub_suites;
