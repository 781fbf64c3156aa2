pub mod archive;
pub mod backup_config;
pub mod compress;
pub mod layout;
pub mod lock;
pub mod redacted;
pub mod remote;
pub mod result_error;
pub mod retention;
pub mod runner;
pub mod session;
pub mod tier;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
