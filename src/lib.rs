use chrono::{Local, NaiveDate};

pub mod channels;
pub mod cli;
pub mod commands;
pub mod error;
pub mod extract;
pub mod output;
pub mod settings;
pub mod slack;

pub use error::{AppError, Result};

pub fn load_token() -> Result<String> {
    std::env::var("SLACK_TOKEN").map_err(|_| AppError::MissingToken)
}

pub fn default_to_date() -> NaiveDate {
    Local::now().date_naive()
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::InvalidDate(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_valid() {
        let date = parse_date("2026-08-05").unwrap();
        assert_eq!(date.to_string(), "2026-08-05");
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(matches!(
            parse_date("05/08/2026"),
            Err(AppError::InvalidDate(_))
        ));
        assert!(matches!(parse_date(""), Err(AppError::InvalidDate(_))));
    }
}
