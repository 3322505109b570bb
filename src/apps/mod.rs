//! Concrete applications registered against the protocol tables (spec.md
//! §4.3). Each app is a `&'static dyn App` singleton, the same shape
//! `register.c`'s `appTable[]` rows take.

pub mod redis_app;
pub mod static_file;
pub mod wsgi;

use crate::app::App;

pub fn all() -> Vec<&'static dyn App> {
    vec![
        &static_file::STATIC_FILE_APP,
        &wsgi::WSGI_APP,
        &redis_app::REDIS_APP,
    ]
}
