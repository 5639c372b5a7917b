mod background;
mod config_wiring;
mod subscriptions;
mod summary_progress;
