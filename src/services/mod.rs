pub mod config_emitter;
