//! Line diffs for test output comparison.
//!
//! Small LCS-based diff: good enough for the expected-vs-actual check test
//! rules need, where outputs are short and failures should list exact lines.

use camino::Utf8Path;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiffAction {
    /// Present in actual, missing from expected.
    Add,
    /// Present in expected, missing from actual.
    Remove,
}

impl DiffAction {
    pub fn prefix(self) -> char {
        match self {
            DiffAction::Add => '+',
            DiffAction::Remove => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    /// 1-based: expected-side for removals, actual-side for additions.
    pub line_number: usize,
    pub action: DiffAction,
    pub line: String,
}

/// Diffs two texts line-wise. An empty result means the texts match.
pub fn diff_lines(expected: &str, actual: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = expected.lines().collect();
    let new: Vec<&str> = actual.lines().collect();

    // Longest-common-subsequence table; lcs[i][j] is the LCS length of
    // old[i..] and new[j..].
    let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut changes = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            changes.push(DiffLine {
                line_number: i + 1,
                action: DiffAction::Remove,
                line: old[i].to_owned(),
            });
            i += 1;
        } else {
            changes.push(DiffLine {
                line_number: j + 1,
                action: DiffAction::Add,
                line: new[j].to_owned(),
            });
            j += 1;
        }
    }
    for rest in i..old.len() {
        changes.push(DiffLine {
            line_number: rest + 1,
            action: DiffAction::Remove,
            line: old[rest].to_owned(),
        });
    }
    for rest in j..new.len() {
        changes.push(DiffLine {
            line_number: rest + 1,
            action: DiffAction::Add,
            line: new[rest].to_owned(),
        });
    }
    changes
}

/// Diffs two files, treating a missing file as empty.
pub fn diff_files(expected: &Utf8Path, actual: &Utf8Path) -> std::io::Result<Vec<DiffLine>> {
    let read = |path: &Utf8Path| match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    };
    Ok(diff_lines(&read(expected)?, &read(actual)?))
}
