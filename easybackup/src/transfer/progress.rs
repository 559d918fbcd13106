//! Line classifiers for rsync `--info=progress2 --progress` output.
//!
//! Both parsers are pure functions of one line. Lines neither recognizes are
//! ignored by the caller; they never affect whether a transfer succeeded.

use std::sync::Arc;

/// Overall transfer progress reported by rsync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes transferred so far, thousands separators removed
    pub bytes_transferred: u64,

    /// Overall completion percentage as printed by rsync
    pub percent: u32,

    /// Current speed exactly as printed, e.g. `522.43kB/s`
    pub speed: String,

    /// Elapsed (or, at 100 %, total) time as printed, e.g. `0:00:19`
    pub elapsed_time: String,

    /// Number of files transferred so far (`xfr#`)
    pub transfer_index: u64,

    /// Files checked so far (`ir-chk`/`to-chk` numerator)
    pub items_scanned: u64,

    /// Files known so far (`ir-chk`/`to-chk` denominator)
    pub items_total: u64,
}

/// One structured event from a line of transfer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    CurrentFile { name: String },
    Progress(TransferProgress),
}

/// Callback for progress events
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// A bare file name carrying an extension, with no statistics suffix.
pub fn parse_current_file(line: &str) -> Option<String> {
    let candidate = line.trim_end_matches(['\r', '\n']).trim_start();
    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return None;
    }
    let has_extension = candidate
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < candidate.len());
    has_extension.then(|| candidate.to_string())
}

/// `<bytes> <percent>% <speed> <elapsed> (xfr#<n>, ir-chk=<i>/<total>)`
///
/// The `to-chk=` form rsync prints once the file list is complete is accepted too.
pub fn parse_progress(line: &str) -> Option<TransferProgress> {
    let rest = line.trim_start();

    let (bytes, rest) = next_word(rest)?;
    if !bytes.starts_with(|c: char| c.is_ascii_digit())
        || !bytes.chars().all(|c| c.is_ascii_digit() || c == ',')
    {
        return None;
    }
    let bytes_transferred = bytes.replace(',', "").parse().ok()?;

    let (percent, rest) = next_word(rest)?;
    let percent = digits(percent.strip_suffix('%')?)?.parse().ok()?;

    let (speed, rest) = next_word(rest)?;
    if !is_speed(speed) {
        return None;
    }

    let (elapsed, rest) = next_word(rest)?;
    if elapsed.is_empty() || !elapsed.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return None;
    }

    let rest = rest.strip_prefix("(xfr#")?;
    let (transfer_index, rest) = leading_number(rest)?;
    let rest = rest.strip_prefix(',')?.trim_start();
    let rest = rest
        .strip_prefix("ir-chk=")
        .or_else(|| rest.strip_prefix("to-chk="))?;
    let (items_scanned, rest) = leading_number(rest)?;
    let (items_total, rest) = leading_number(rest.strip_prefix('/')?)?;
    rest.strip_prefix(')')?;

    Some(TransferProgress {
        bytes_transferred,
        percent,
        speed: speed.to_string(),
        elapsed_time: elapsed.to_string(),
        transfer_index,
        items_scanned,
        items_total,
    })
}

/// Run both classifiers; a statistics line wins over a file name.
pub fn classify(line: &str) -> Option<ProgressEvent> {
    if let Some(progress) = parse_progress(line) {
        return Some(ProgressEvent::Progress(progress));
    }
    parse_current_file(line).map(|name| ProgressEvent::CurrentFile { name })
}

/// Split off a word that must be followed by whitespace.
fn next_word(s: &str) -> Option<(&str, &str)> {
    let end = s.find(char::is_whitespace)?;
    Some((&s[..end], s[end..].trim_start()))
}

fn digits(s: &str) -> Option<&str> {
    (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())).then_some(s)
}

fn leading_number(s: &str) -> Option<(u64, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = digits(&s[..end])?.parse().ok()?;
    Some((value, &s[end..]))
}

/// `[\d.]+[kMG]?B/s`
fn is_speed(s: &str) -> bool {
    let Some(number) = s.strip_suffix("B/s") else {
        return false;
    };
    let number = number
        .strip_suffix(['k', 'M', 'G'])
        .unwrap_or(number);
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_canonical_line() {
        let progress =
            parse_progress("10,220,696   0%  522.43kB/s    0:00:19 (xfr#1772, ir-chk=1389/18955)")
                .unwrap();
        assert_eq!(progress.bytes_transferred, 10_220_696);
        assert_eq!(progress.percent, 0);
        assert_eq!(progress.speed, "522.43kB/s");
        assert_eq!(progress.elapsed_time, "0:00:19");
        assert_eq!(progress.transfer_index, 1772);
        assert_eq!(progress.items_scanned, 1389);
        assert_eq!(progress.items_total, 18955);
    }

    #[test]
    fn test_parse_progress_variants() {
        let done = parse_progress("  1,234,567,890 100%   85.20MB/s    0:00:13 (xfr#20, to-chk=0/25)").unwrap();
        assert_eq!(done.bytes_transferred, 1_234_567_890);
        assert_eq!(done.percent, 100);
        assert_eq!(done.items_scanned, 0);
        assert_eq!(done.items_total, 25);

        let tight = parse_progress("512 3% 1.00GB/s 1:02:03 (xfr#7,ir-chk=1/9)").unwrap();
        assert_eq!(tight.transfer_index, 7);
        assert_eq!(tight.speed, "1.00GB/s");

        let plain_bytes = parse_progress("0   0%    0.00B/s    0:00:00 (xfr#0, ir-chk=0/1)").unwrap();
        assert_eq!(plain_bytes.speed, "0.00B/s");
    }

    #[test]
    fn test_parse_progress_rejects_other_lines() {
        for line in [
            "not a progress line",
            "",
            "sending incremental file list",
            "photo.jpg",
            "10,220,696   0%  522.43kB/s    0:00:19",
            ",220,696   0%  522.43kB/s    0:00:19 (xfr#1, ir-chk=1/2)",
            "10,220,696   x%  522.43kB/s    0:00:19 (xfr#1, ir-chk=1/2)",
            "10,220,696   0%  522.43TB/s    0:00:19 (xfr#1, ir-chk=1/2)",
            "10,220,696   0%  522.43kB/s    0:00:19 (xfr#1, ir-chk=1/2",
            "sent 1,024 bytes  received 35 bytes  2,118.00 bytes/sec",
        ] {
            assert_eq!(parse_progress(line), None, "line: {line:?}");
        }
    }

    #[test]
    fn test_parse_current_file() {
        assert_eq!(parse_current_file("photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(
            parse_current_file("   2024/trip/IMG_0001.HEIC\n").as_deref(),
            Some("2024/trip/IMG_0001.HEIC")
        );
        assert_eq!(
            parse_current_file("          100 100%    0.00kB/s    0:00:00 (xfr#1, to-chk=9/10)"),
            None
        );
        assert_eq!(parse_current_file("photos/2024/"), None);
        assert_eq!(parse_current_file(".bashrc"), None);
        assert_eq!(parse_current_file("my photo.jpg"), None);
        assert_eq!(parse_current_file(""), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("notes.txt"),
            Some(ProgressEvent::CurrentFile {
                name: "notes.txt".to_string()
            })
        );
        assert!(matches!(
            classify("1,024 50% 1.00kB/s 0:00:01 (xfr#1, ir-chk=1/2)"),
            Some(ProgressEvent::Progress(_))
        ));
        assert_eq!(classify("sending incremental file list"), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }
}
