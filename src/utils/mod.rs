mod redact;

pub use redact::RedactedStr;

/// Read an optional environment variable.
macro_rules! load_opt_env {
    ($var:expr) => {
        std::env::var($var).ok()
    };
}

pub(crate) use load_opt_env;
