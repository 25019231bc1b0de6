use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};

use crate::channels::{detect_active_channels, resolve_channel_ids};
use crate::error::{AppError, Result};
use crate::extract::extract_user_messages;
use crate::output::{self, OutputFormat};
use crate::settings::Settings;
use crate::slack::{self, SlackClient};
use crate::{default_to_date, load_token, parse_date};

pub async fn run_extract(
    from: Option<String>,
    to: Option<String>,
    user: Option<String>,
    context: Option<usize>,
    format: Option<String>,
    output: Option<String>,
    config: Option<String>,
) -> Result<()> {
    let token = load_token()?;
    let settings = Settings::load(config.as_deref().map(Path::new))?;

    let to_date = match to {
        Some(s) => parse_date(&s)?,
        None => default_to_date(),
    };
    let from_date = match from {
        Some(s) => parse_date(&s)?,
        None => to_date - chrono::Duration::days(i64::from(settings.extract.default_days)),
    };
    if from_date > to_date {
        return Err(AppError::InvalidDateRange {
            start: from_date.to_string(),
            end: to_date.to_string(),
        });
    }
    let start = day_start_utc(from_date);
    let end = day_start_utc(to_date.succ_opt().unwrap_or(to_date));

    let format = OutputFormat::parse(format.as_deref().unwrap_or(&settings.output.format))?;
    let context_window = context.unwrap_or(settings.extract.context_messages);

    let mut client = SlackClient::new(&token)?;

    let target_user = match user.or_else(|| settings.user_id.clone()) {
        Some(id) => id,
        None => client.auth_user_id().await.ok_or(AppError::MissingUser)?,
    };

    println!(
        "Extracting messages for {} from {} to {}...",
        target_user, from_date, to_date
    );

    let channel_ids = if settings.channels.include.is_empty() {
        detect_active_channels(&mut client, &target_user, start, end, &settings.channels.exclude)
            .await?
    } else {
        let resolved = resolve_channel_ids(&mut client, &settings.channels.include).await?;
        if !resolved.invalid.is_empty() {
            println!(
                "Warning: ignoring unresolved channels: {}",
                resolved.invalid.join(", ")
            );
        }
        let excluded = resolve_channel_ids(&mut client, &settings.channels.exclude).await?;
        resolved
            .valid
            .into_iter()
            .filter(|id| !excluded.valid.contains(id))
            .collect()
    };

    if channel_ids.is_empty() {
        println!("No channels to process, check the channel settings.");
    }

    let result = extract_user_messages(
        &mut client,
        &channel_ids,
        &target_user,
        start,
        end,
        context_window,
    )
    .await?;

    let file_name = output::build_file_name(
        output.as_deref().or(settings.output.file_name.as_deref()),
        format,
        Local::now(),
    );
    let content = output::render(&result, format)?;
    let path = output::save_report(&content, &file_name, &settings.output.dir)?;

    println!(
        "Extraction completed successfully! {} messages in {} channels written to {}.",
        result.summary.total_matches,
        result.summary.total_channels,
        path.display()
    );
    Ok(())
}

pub async fn run_export_channels(output: &str) -> Result<()> {
    let token = load_token()?;

    println!("Exporting channels to {}...", output);

    let mut client = SlackClient::new(&token)?;
    let count = slack::export_channels(&mut client, Path::new(output)).await?;

    println!("Export completed successfully! {} channels exported.", count);
    Ok(())
}

fn day_start_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_start_utc() {
        let date = parse_date("2026-08-05").unwrap();
        let dt = day_start_utc(date);
        assert_eq!(dt.to_rfc3339(), "2026-08-05T00:00:00+00:00");
    }
}
