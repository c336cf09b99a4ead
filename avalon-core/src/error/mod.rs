mod context;
mod error;
mod kinds;

pub use error::{
    WrapError,
    WrapOptionError,
    WrapResultError,
};
pub use kinds::{
    general_error,
    not_found_error,
    GeneralError,
    NotFoundError,
};
