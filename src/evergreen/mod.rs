pub mod evg_api;
pub mod evg_config;
pub mod evg_config_utils;
pub mod evg_expansions;
pub mod evg_task_history;
