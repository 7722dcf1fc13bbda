//! Navigation helpers shared by the adapters.

use std::path::PathBuf;
use std::time::Duration;

use autobot_browser::{download, By, ElementHandle};
use autobot_core::AutobotError;
use autobot_worker::AdapterCtx;

/// Default explicit-wait budget, matching the portals' general sluggishness.
pub const WAIT: Duration = Duration::from_secs(20);

/// Locate the clickable ancestor of a `<span>` with the given exact text
/// (the Oracle JET portals bury buttons under spans).
pub fn by_span_button(text: &str) -> By {
    By::xpath(format!(
        "//span[normalize-space(text())='{text}']\
         /ancestor::*[self::button or @role='button'][1]"
    ))
}

/// Type into an element after clearing it.
pub fn fill(
    ctx: &mut AdapterCtx<'_>,
    el: &ElementHandle,
    value: &str,
) -> Result<(), AutobotError> {
    ctx.session.clear(el)?;
    ctx.session.type_text(el, value)
}

/// Write a date string into a (possibly readonly) date input.
pub fn fill_date(
    ctx: &mut AdapterCtx<'_>,
    by: &By,
    value: &str,
) -> Result<(), AutobotError> {
    let input = ctx.session.find(by, WAIT)?;
    ctx.session.remove_readonly(&input)?;
    ctx.session.set_value(&input, value)
}

/// Snapshot the download dir, run `trigger`, then wait for the new
/// size-stable statement file.
pub fn download_after(
    ctx: &mut AdapterCtx<'_>,
    extensions: &[&str],
    trigger: impl FnOnce(&mut AdapterCtx<'_>) -> Result<(), AutobotError>,
) -> Result<PathBuf, AutobotError> {
    let dir = ctx.session.download_dir().to_path_buf();
    let before = download::snapshot_dir(&dir);
    trigger(ctx)?;
    let stop = ctx.stop.clone();
    download::wait_for_new_file(
        &dir,
        extensions,
        &before,
        ctx.tuning.download_timeout,
        ctx.tuning.download_stable,
        &move || stop.is_set(),
    )
}

/// First visible, enabled element among those matching `by`. Finacle pages
/// render the same submit button several times, mostly hidden.
pub fn first_displayed(
    ctx: &mut AdapterCtx<'_>,
    by: &By,
) -> Result<ElementHandle, AutobotError> {
    for el in ctx.session.find_all(by)? {
        if ctx.session.is_displayed(&el).unwrap_or(false) {
            return Ok(el);
        }
    }
    Err(AutobotError::ElementNotFound(by.to_string()))
}

/// Wait until any of the locators matches, returning the first hit.
pub fn find_any(
    ctx: &mut AdapterCtx<'_>,
    locators: &[By],
    timeout: Duration,
) -> Result<(usize, ElementHandle), AutobotError> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        for (i, by) in locators.iter().enumerate() {
            if let Some(el) = ctx.session.try_find(by)? {
                return Ok((i, el));
            }
        }
        if std::time::Instant::now() >= deadline {
            return Err(AutobotError::ElementNotFound(
                locators
                    .iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(" | "),
            ));
        }
        if ctx.stop.is_set() {
            return Err(AutobotError::Cancelled);
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}
