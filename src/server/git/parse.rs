//! Parsing layer for git's textual output
//!
//! Every function here is pure: raw stdout in, typed structure out. Callers only
//! see `ParsedStatus`, `ParsedBranches`, `ParsedLog` and `ParsedDiff`, so the
//! subprocess backend can be swapped without touching them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Status
// ============================================================================

/// One changed path from `git status --porcelain=v1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Trimmed two-column code: "M", "MM", "A", "??" ...
    pub status: String,
    pub staged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStatus {
    pub entries: Vec<FileChange>,
}

impl ParsedStatus {
    pub fn staged(&self) -> Vec<FileChange> {
        self.entries.iter().filter(|e| e.staged).cloned().collect()
    }

    pub fn unstaged(&self) -> Vec<FileChange> {
        self.entries.iter().filter(|e| !e.staged).cloned().collect()
    }
}

/// Parse one porcelain v1 line: `XY PATH` or `XY ORIG -> PATH`
///
/// X is the index column, Y the work tree column. A change counts as staged
/// when X is present and neither a space nor `?`.
pub fn parse_status_line(line: &str) -> Option<FileChange> {
    if line.len() < 4 || !line.is_char_boundary(2) || !line.is_char_boundary(3) {
        return None;
    }
    let columns = &line[..2];
    let x = columns.chars().next()?;
    let path = &line[3..];
    let path = match path.split_once(" -> ") {
        Some((_, renamed)) => renamed,
        None => path,
    };
    let path = unquote(path);
    if path.is_empty() {
        return None;
    }

    Some(FileChange {
        path,
        status: columns.trim().to_string(),
        staged: x != ' ' && x != '?',
    })
}

pub fn parse_status(output: &str) -> ParsedStatus {
    ParsedStatus {
        entries: output.lines().filter_map(parse_status_line).collect(),
    }
}

/// git quotes paths with unusual characters: `"a b.txt"`
fn unquote(path: &str) -> String {
    if path.len() >= 2 && path.starts_with('"') && path.ends_with('"') {
        path[1..path.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        path.to_string()
    }
}

// ============================================================================
// Branches
// ============================================================================

/// Upstream of a local branch, as reported by `git branch -vv`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub local: String,
    pub remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ahead: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behind: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<Upstream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBranches {
    pub local: Vec<Branch>,
    pub remote: Vec<Branch>,
}

impl ParsedBranches {
    pub fn current(&self) -> Option<&Branch> {
        self.local.iter().find(|b| b.current)
    }
}

/// Split the `* ` / `+ ` / `  ` marker from a branch listing line
fn strip_marker(line: &str) -> (bool, &str) {
    if let Some(rest) = line.strip_prefix("* ") {
        (true, rest.trim())
    } else if let Some(rest) = line.strip_prefix("+ ") {
        (false, rest.trim())
    } else {
        (false, line.trim())
    }
}

fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((&s[..end], s[end..].trim_start()))
}

fn parse_tracking_line(line: &str) -> Option<Upstream> {
    let (_, body) = strip_marker(line);
    // (HEAD detached at ...) has no upstream
    if body.starts_with('(') {
        return None;
    }
    let (name, rest) = split_token(body)?;
    let (_hash, rest) = split_token(rest)?;
    let inner = rest.strip_prefix('[')?;
    let close = inner.find(']')?;
    let inner = &inner[..close];

    let (remote, counts) = match inner.split_once(':') {
        Some((remote, counts)) => (remote.trim(), counts),
        None => (inner.trim(), ""),
    };
    if remote.is_empty() {
        return None;
    }

    let mut ahead = None;
    let mut behind = None;
    for part in counts.split(',') {
        let part = part.trim();
        if let Some(n) = part.strip_prefix("ahead ") {
            ahead = n.trim().parse().ok();
        } else if let Some(n) = part.strip_prefix("behind ") {
            behind = n.trim().parse().ok();
        }
    }

    Some(Upstream {
        local: name.to_string(),
        remote: remote.to_string(),
        ahead,
        behind,
    })
}

/// Parse `git branch -vv` into local name -> upstream.
/// Branches without a bracketed upstream produce no entry.
pub fn parse_branch_tracking(output: &str) -> HashMap<String, Upstream> {
    output
        .lines()
        .filter_map(parse_tracking_line)
        .map(|u| (u.local.clone(), u))
        .collect()
}

/// Parse plain `git branch` output
pub fn parse_local_branches(output: &str, tracking: &HashMap<String, Upstream>) -> Vec<Branch> {
    output
        .lines()
        .filter_map(|line| {
            let (current, name) = strip_marker(line);
            if name.is_empty() || name.starts_with('(') {
                return None;
            }
            Some(Branch {
                name: name.to_string(),
                current,
                upstream: tracking.get(name).cloned(),
            })
        })
        .collect()
}

/// Parse `git branch -a`, keeping only `remotes/` entries.
/// `current_upstream` marks the remote branch the checked-out branch tracks.
pub fn parse_remote_branches(output: &str, current_upstream: Option<&str>) -> Vec<Branch> {
    output
        .lines()
        .filter_map(|line| {
            let (_, name) = strip_marker(line);
            let name = name.strip_prefix("remotes/")?;
            // origin/HEAD -> origin/main
            if name.contains(" -> ") {
                return None;
            }
            Some(Branch {
                name: name.to_string(),
                current: current_upstream == Some(name),
                upstream: None,
            })
        })
        .collect()
}

pub fn parse_branches(plain: &str, all: &str, verbose: &str) -> ParsedBranches {
    let tracking = parse_branch_tracking(verbose);
    let local = parse_local_branches(plain, &tracking);
    let current_upstream = local
        .iter()
        .find(|b| b.current)
        .and_then(|b| b.upstream.as_ref())
        .map(|u| u.remote.clone());
    let remote = parse_remote_branches(all, current_upstream.as_deref());
    ParsedBranches { local, remote }
}

// ============================================================================
// Log
// ============================================================================

/// `git log` pretty format matching [`parse_log_line`]: hash + parents, decoration,
/// author, date, subject
pub const LOG_FORMAT: &str = "--pretty=format:%h %p|%d|%an|%ad|%s";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub parents: Vec<String>,
    pub decoration: String,
    pub author: String,
    pub date: String,
    pub message: String,
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLog {
    pub commits: Vec<Commit>,
}

/// Branch names from a decoration such as `(HEAD -> main, origin/main)`
fn decoration_branches(decoration: &str) -> Vec<String> {
    if !decoration.contains("->") {
        return Vec::new();
    }
    decoration
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|segment| {
            let segment = segment.trim();
            segment.strip_prefix("HEAD -> ").unwrap_or(segment).trim()
        })
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `hash[ parents...]|decoration|author|date|subject`
pub fn parse_log_line(line: &str) -> Option<Commit> {
    let mut fields = line.splitn(5, '|');
    let ids = fields.next()?;
    let decoration = fields.next()?.trim();
    let author = fields.next()?;
    let date = fields.next()?;
    let subject = fields.next()?;

    let mut ids = ids.split_whitespace();
    let hash = ids.next()?.to_string();
    let parents = ids.map(str::to_string).collect();

    Some(Commit {
        hash,
        parents,
        decoration: decoration.to_string(),
        author: author.to_string(),
        date: date.to_string(),
        message: subject.to_string(),
        branches: decoration_branches(decoration),
    })
}

pub fn parse_log(output: &str) -> ParsedLog {
    ParsedLog {
        commits: output.lines().filter_map(parse_log_line).collect(),
    }
}

// ============================================================================
// Stash
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    /// `stash@{N}`
    pub name: String,
    pub message: String,
    pub files: Vec<String>,
}

/// Parse `git stash list` (`stash@{0}: On main: message`); files are filled in later
pub fn parse_stash_list(output: &str) -> Vec<StashEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (name, message) = line.split_once(": ")?;
            if !name.starts_with("stash@{") {
                return None;
            }
            Some(StashEntry {
                name: name.to_string(),
                message: message.to_string(),
                files: Vec::new(),
            })
        })
        .collect()
}

/// Parse `--name-only` style output
pub fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Paths listed by checkout/merge when local changes block a branch switch:
///
/// ```text
/// error: Your local changes to the following files would be overwritten by checkout:
///         a.txt
/// Please commit your changes or stash them before you switch branches.
/// ```
pub fn parse_overwritten_files(output: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut in_list = false;
    for line in output.lines() {
        if line.contains("would be overwritten by") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        if line.starts_with('\t') || line.starts_with("    ") {
            let path = line.trim();
            if !path.is_empty() && !files.iter().any(|f| f == path) {
                files.push(path.to_string());
            }
        } else {
            in_list = false;
        }
    }
    files
}

// ============================================================================
// Diff
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

/// A rendered diff line with the line numbers the viewer displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub header: String,
    pub old_start: u32,
    pub new_start: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub hunks: Vec<Hunk>,
}

/// `@@ -a,b +c,d @@ trailing` -> (a, c, trailing)
fn parse_hunk_header(line: &str) -> Option<(u32, u32, Option<&str>)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_range, rest) = rest.split_once(" +")?;
    let (new_range, trailing) = rest.split_once(" @@")?;
    let old_start = old_range.split(',').next()?.parse().ok()?;
    let new_start = new_range.split(',').next()?.parse().ok()?;
    let trailing = trailing.strip_prefix(' ').unwrap_or(trailing);
    let trailing = if trailing.is_empty() { None } else { Some(trailing) };
    Some((old_start, new_start, trailing))
}

fn render_line(line: &str, old: &mut u32, new: &mut u32) -> DiffLine {
    if let Some(content) = line.strip_prefix('+') {
        let n = *new;
        *new += 1;
        DiffLine {
            kind: LineKind::Added,
            old_line: None,
            new_line: Some(n),
            content: content.to_string(),
        }
    } else if let Some(content) = line.strip_prefix('-') {
        let o = *old;
        *old += 1;
        DiffLine {
            kind: LineKind::Removed,
            old_line: Some(o),
            new_line: None,
            content: content.to_string(),
        }
    } else {
        let (o, n) = (*old, *new);
        *old += 1;
        *new += 1;
        DiffLine {
            kind: LineKind::Context,
            old_line: Some(o),
            new_line: Some(n),
            content: line.strip_prefix(' ').unwrap_or(line).to_string(),
        }
    }
}

/// Render unified diff text into hunks with old/new line numbers.
///
/// Each hunk header resets both counters to its declared starts. `+` lines show
/// and advance only the new counter, `-` lines only the old one, anything else
/// both. Text trailing the header on the same line is rendered by the same rule.
/// `\` marker lines are dropped without touching either counter.
pub fn parse_diff(text: &str) -> ParsedDiff {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    let (mut old, mut new) = (0u32, 0u32);

    for line in text.lines() {
        if line.starts_with("diff --git") {
            hunks.extend(current.take());
            continue;
        }

        if let Some((old_start, new_start, trailing)) = parse_hunk_header(line) {
            hunks.extend(current.take());
            old = old_start;
            new = new_start;
            let mut hunk = Hunk {
                header: line.to_string(),
                old_start,
                new_start,
                lines: Vec::new(),
            };
            if let Some(trailing) = trailing {
                hunk.lines.push(render_line(trailing, &mut old, &mut new));
            }
            current = Some(hunk);
            continue;
        }

        // Outside a hunk: file headers (index, ---, +++, mode lines) are skipped
        if let Some(hunk) = current.as_mut() {
            // `\ No newline at end of file` annotates the previous line only
            if line.starts_with('\\') {
                continue;
            }
            hunk.lines.push(render_line(line, &mut old, &mut new));
        }
    }
    hunks.extend(current);

    ParsedDiff { hunks }
}
