use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde_yaml::{Mapping, Value};

/// One line of a file, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailLine {
    pub number: usize,
    pub text: String,
}

/// The last `n` lines of `path`, numbered relative to the whole file.
///
/// The file is read in one pass, so the numbering stays correct even if
/// the writer appends between two calls.
pub fn tail_with_line_numbers(path: &Path, n: usize) -> io::Result<Vec<TailLine>> {
    let reader = BufReader::new(File::open(path)?);
    let mut last: VecDeque<String> = VecDeque::with_capacity(n + 1);
    let mut total = 0;

    for line in reader.split(b'\n') {
        let line = line?;
        total += 1;
        let text = String::from_utf8_lossy(&line);
        last.push_back(text.trim_end_matches('\r').to_owned());
        if last.len() > n {
            last.pop_front();
        }
    }

    let first = total - last.len() + 1;
    Ok(last
        .into_iter()
        .enumerate()
        .map(|(i, text)| TailLine {
            number: first + i,
            text,
        })
        .collect())
}

/// The structured record in `path` (see [`last_record`]); a missing file has none.
pub fn read_status_record(path: &Path) -> io::Result<Mapping> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(last_record(String::from_utf8_lossy(&bytes).lines())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Mapping::new()),
        Err(e) => Err(e),
    }
}

/// Scanning backwards, the first line that parses as a key/value mapping.
/// Anything else (plain text, lists, broken YAML) is skipped.
pub fn last_record<'a, I>(lines: I) -> Mapping
where
    I: DoubleEndedIterator<Item = &'a str>,
{
    for line in lines.rev() {
        if let Ok(Value::Mapping(record)) = serde_yaml::from_str::<Value>(line) {
            return record;
        }
    }
    Mapping::new()
}
