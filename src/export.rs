//! Writes a finished conversation into the chat history workbook.
//!
//! Each session becomes a new worksheet placed in front of the older ones:
//!
//! ```text
//! row 1   2024/05/01 10:00:00
//! row 2   role      | content
//! row 3   user      | hi
//! row 4   assistant | hello      (shaded)
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};
use umya_spreadsheet::{reader, writer, Spreadsheet, Worksheet};

use crate::cli::Config;
use crate::errors::ExportError;
use crate::transcript::{Role, Summary, Transcript};

/// Characters Excel refuses in worksheet names.
pub const RESERVED_TITLE_CHARS: [char; 7] = [':', '\\', '/', '?', '*', '[', ']'];
/// Excel's worksheet name length limit.
pub const MAX_TITLE_CHARS: usize = 31;
/// Title used when nothing usable is left of the summary.
pub const FALLBACK_TITLE: &str = "chat";

pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
pub const HEADER_ROW: u32 = 2;
pub const FIRST_DATA_ROW: u32 = 3;
/// Row height per line of message content, in points.
pub const LINE_HEIGHT: f64 = 18.0;

const FONT_NAME: &str = "Meiryo";
const HEADER_FILL: &str = "FF217346";
const HEADER_TEXT: &str = "FFFFFFFF";
const ASSISTANT_FILL: &str = "FFD9D9D9";
const ROLE_COLUMN_WIDTH: f64 = 22.0;
const CONTENT_COLUMN_WIDTH: f64 = 168.0;

/// Remove characters Excel does not allow in a worksheet name.
pub fn sanitize_title(summary: &str) -> String {
    let cleaned: String = summary
        .chars()
        .filter(|c| !RESERVED_TITLE_CHARS.contains(c) && !c.is_control())
        .collect();
    let clipped: String = cleaned.trim().chars().take(MAX_TITLE_CHARS).collect();
    // Excel also rejects names that begin or end with an apostrophe.
    let clipped = clipped.trim_matches('\'').trim();
    if clipped.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        clipped.to_string()
    }
}

/// First of `base`, `base1`, `base2`, ... for which `taken` is false.
///
/// Excel compares worksheet names case-insensitively, so `taken` should too.
pub fn unique_title(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n: u32| {
            let suffix = n.to_string();
            let keep = MAX_TITLE_CHARS.saturating_sub(suffix.len());
            let stem: String = base.chars().take(keep).collect();
            format!("{stem}{suffix}")
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Where and how one transcript message lands on the worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout<'a> {
    pub row: u32,
    pub role: Role,
    pub content: &'a str,
    pub height: f64,
    pub shaded: bool,
}

/// Lay out every message below the header band, in transcript order.
pub fn layout_rows(transcript: &Transcript) -> Vec<RowLayout<'_>> {
    transcript
        .messages()
        .iter()
        .zip(FIRST_DATA_ROW..)
        .map(|(message, row)| RowLayout {
            row,
            role: message.role,
            content: &message.content,
            height: message.content.split('\n').count() as f64 * LINE_HEIGHT,
            shaded: message.role == Role::Assistant,
        })
        .collect()
}

/// Read the workbook at `path`, or start an empty one if there is none yet.
pub fn load_or_create(path: &Path) -> Result<Spreadsheet, ExportError> {
    if path.exists() {
        debug!(path = %path.display(), "loading workbook");
        reader::xlsx::read(path).map_err(|e| ExportError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    } else {
        debug!(path = %path.display(), "creating workbook");
        Ok(umya_spreadsheet::new_file_empty_worksheet())
    }
}

/// Add a worksheet named after `summary` as the first, active sheet. Returns its title.
pub fn add_session_sheet(book: &mut Spreadsheet, summary: &Summary) -> Result<String, ExportError> {
    let existing: Vec<String> = book
        .get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_lowercase())
        .collect();
    let title = unique_title(&sanitize_title(summary.as_str()), |candidate| {
        existing.contains(&candidate.to_lowercase())
    });

    book.new_sheet(title.as_str())
        .map_err(|reason| ExportError::Worksheet {
            title: title.clone(),
            reason: reason.to_string(),
        })?;
    book.get_sheet_collection_mut().rotate_right(1);
    book.get_workbook_view_mut().set_active_tab(0);
    debug!(%title, sheets = existing.len() + 1, "added worksheet");
    Ok(title)
}

fn write_header(sheet: &mut Worksheet, timestamp: &str) {
    sheet.get_cell_mut("A1").set_value_string(timestamp);
    sheet
        .get_style_mut("A1")
        .get_font_mut()
        .set_name(FONT_NAME)
        .set_size(11.0)
        .set_bold(true);

    for (cell, label) in [("A2", "role"), ("B2", "content")] {
        sheet.get_cell_mut(cell).set_value_string(label);
        let style = sheet.get_style_mut(cell);
        style
            .get_font_mut()
            .set_name(FONT_NAME)
            .set_size(11.0)
            .set_bold(true)
            .get_color_mut()
            .set_argb(HEADER_TEXT);
        style.set_background_color(HEADER_FILL);
    }

    sheet
        .get_column_dimension_mut("A")
        .set_width(ROLE_COLUMN_WIDTH);
    sheet
        .get_column_dimension_mut("B")
        .set_width(CONTENT_COLUMN_WIDTH);
}

fn write_rows(sheet: &mut Worksheet, rows: &[RowLayout<'_>]) {
    for row in rows {
        let role_cell = format!("A{}", row.row);
        let content_cell = format!("B{}", row.row);

        sheet
            .get_cell_mut(role_cell.as_str())
            .set_value_string(row.role.to_string());
        sheet
            .get_cell_mut(content_cell.as_str())
            .set_value_string(row.content);
        sheet
            .get_style_mut(content_cell.as_str())
            .get_alignment_mut()
            .set_wrap_text(true);

        for cell in [&role_cell, &content_cell] {
            let style = sheet.get_style_mut(cell.as_str());
            style.get_font_mut().set_name(FONT_NAME).set_size(10.0);
            if row.shaded {
                style.set_background_color(ASSISTANT_FILL);
            }
        }

        sheet
            .get_row_dimension_mut(&row.row)
            .set_height(row.height)
            .set_custom_height(true);
    }
}

/// Append the conversation as a new worksheet and save the workbook. Returns the sheet title.
pub fn write_workbook(
    transcript: &Transcript,
    summary: &Summary,
    path: &Path,
) -> Result<String, ExportError> {
    let mut book = load_or_create(path)?;
    let title = add_session_sheet(&mut book, summary)?;

    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let rows = layout_rows(transcript);
    let sheet = book
        .get_sheet_by_name_mut(&title)
        .ok_or_else(|| ExportError::Worksheet {
            title: title.clone(),
            reason: "worksheet missing after insert".to_string(),
        })?;
    write_header(sheet, &timestamp);
    write_rows(sheet, &rows);

    writer::xlsx::write(&book, path).map_err(|e| ExportError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    info!(path = %path.display(), %title, rows = rows.len(), "saved conversation");
    Ok(title)
}

/// Save the conversation to the configured workbook and show it to the user.
pub fn export(
    transcript: Transcript,
    summary: Summary,
    config: &Config,
) -> Result<PathBuf, ExportError> {
    write_workbook(&transcript, &summary, &config.workbook)?;
    if config.open_after_export {
        open_in_viewer(&config.workbook);
    }
    Ok(config.workbook.clone())
}

fn viewer_command(path: &Path) -> Command {
    if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(path);
        command
    } else if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(path);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(path);
        command
    }
}

/// Open `path` with the desktop's default application. Failures are only logged.
pub fn open_in_viewer(path: &Path) {
    match viewer_command(path).status() {
        Ok(status) if status.success() => debug!(path = %path.display(), "opened workbook"),
        Ok(status) => warn!(path = %path.display(), %status, "viewer exited with an error"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not launch a viewer"),
    }
}

/// Lock files office suites leave next to a document they have open.
fn owner_lock_files(path: &Path) -> Vec<PathBuf> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    vec![
        dir.join(format!("~${name}")),
        dir.join(format!(".~lock.{name}#")),
    ]
}

#[cfg(unix)]
fn locked_by_other_process(path: &Path) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = OpenOptions::new().read(true).open(path)?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(_lock) => Ok(false),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(true),
        Err((_, errno)) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn locked_by_other_process(path: &Path) -> io::Result<bool> {
    Ok(OpenOptions::new().read(true).write(true).open(path).is_err())
}

/// Fail if the workbook is open in another program.
pub fn ensure_not_open(path: &Path) -> Result<(), ExportError> {
    if !path.exists() {
        return Ok(());
    }
    let open_elsewhere = match owner_lock_files(path).into_iter().find(|lock| lock.exists()) {
        Some(lock) => {
            debug!(lock = %lock.display(), "found office lock file");
            true
        }
        None => locked_by_other_process(path)?,
    };
    if open_elsewhere {
        return Err(ExportError::WorkbookOpen {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
