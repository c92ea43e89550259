// Line-level Myers diff for prose entity bodies.

use serde::{Deserialize, Serialize};

/// One step of an edit script turning `old` lines into `new` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit<'a> {
    Equal(&'a str),
    Insert(&'a str),
    Delete(&'a str),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineChangeKind {
    Insert,
    Delete,
}

/// A changed line, positioned by 1-based line numbers in both inputs.
///
/// For an insert, `old_line` is the line the text lands before; for a delete,
/// `new_line` is the line that follows the removed text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineChange {
    pub kind: LineChangeKind,
    pub old_line: usize,
    pub new_line: usize,
    pub text: String,
}

/// Upper bound on the number of inserted plus deleted lines the Myers search
/// explores. Past it the search stops, keeping memory at O(bound²).
pub const MAX_EDIT_DISTANCE: usize = 1024;

/// Splits on `\n` only, so a trailing newline yields a final empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    }
}

/// Computes the full edit script from `old_text` to `new_text`.
///
/// When the texts differ by more than [`MAX_EDIT_DISTANCE`] lines the script
/// deletes every differing old line and inserts every differing new one.
pub fn line_edits<'a>(old_text: &'a str, new_text: &'a str) -> Vec<LineEdit<'a>> {
    let old_lines = split_lines(old_text);
    let new_lines = split_lines(new_text);
    bounded_edits(&old_lines, &new_lines, MAX_EDIT_DISTANCE)
        .unwrap_or_else(|| replace_all(&old_lines, &new_lines))
}

/// Computes only the inserted and deleted lines from `old_text` to `new_text`,
/// or `None` when the texts differ by more than [`MAX_EDIT_DISTANCE`] lines.
pub fn diff_lines(old_text: &str, new_text: &str) -> Option<Vec<LineChange>> {
    if old_text == new_text {
        return Some(Vec::new());
    }

    let old_lines = split_lines(old_text);
    let new_lines = split_lines(new_text);
    let edits = bounded_edits(&old_lines, &new_lines, MAX_EDIT_DISTANCE)?;

    let mut changes = Vec::new();
    let mut old_line = 1usize;
    let mut new_line = 1usize;

    for edit in edits {
        match edit {
            LineEdit::Equal(_) => {
                old_line += 1;
                new_line += 1;
            }
            LineEdit::Insert(text) => {
                changes.push(LineChange {
                    kind: LineChangeKind::Insert,
                    old_line,
                    new_line,
                    text: text.to_owned(),
                });
                new_line += 1;
            }
            LineEdit::Delete(text) => {
                changes.push(LineChange {
                    kind: LineChangeKind::Delete,
                    old_line,
                    new_line,
                    text: text.to_owned(),
                });
                old_line += 1;
            }
        }
    }

    Some(changes)
}

/// Myers edit script with the common prefix and suffix peeled off first.
fn bounded_edits<'a>(
    old_lines: &[&'a str],
    new_lines: &[&'a str],
    max_distance: usize,
) -> Option<Vec<LineEdit<'a>>> {
    let prefix = old_lines.iter().zip(new_lines).take_while(|(old, new)| old == new).count();
    let suffix = old_lines[prefix..]
        .iter()
        .rev()
        .zip(new_lines[prefix..].iter().rev())
        .take_while(|(old, new)| old == new)
        .count();

    let old_mid = &old_lines[prefix..old_lines.len() - suffix];
    let new_mid = &new_lines[prefix..new_lines.len() - suffix];

    let mut edits: Vec<LineEdit<'a>> =
        old_lines[..prefix].iter().copied().map(LineEdit::Equal).collect();
    edits.extend(myers_edits(old_mid, new_mid, max_distance)?);
    edits.extend(old_lines[old_lines.len() - suffix..].iter().copied().map(LineEdit::Equal));
    Some(edits)
}

fn replace_all<'a>(old_lines: &[&'a str], new_lines: &[&'a str]) -> Vec<LineEdit<'a>> {
    let prefix = old_lines.iter().zip(new_lines).take_while(|(old, new)| old == new).count();
    old_lines[..prefix]
        .iter()
        .copied()
        .map(LineEdit::Equal)
        .chain(old_lines[prefix..].iter().copied().map(LineEdit::Delete))
        .chain(new_lines[prefix..].iter().copied().map(LineEdit::Insert))
        .collect()
}

fn myers_edits<'a>(
    old_lines: &[&'a str],
    new_lines: &[&'a str],
    max_distance: usize,
) -> Option<Vec<LineEdit<'a>>> {
    let old_len = old_lines.len();
    let new_len = new_lines.len();

    if old_len == 0 || new_len == 0 {
        if old_len + new_len > max_distance {
            return None;
        }
        let deletes = old_lines.iter().copied().map(LineEdit::Delete);
        return Some(deletes.chain(new_lines.iter().copied().map(LineEdit::Insert)).collect());
    }

    let limit = (old_len + new_len).min(max_distance);
    let offset = limit as isize + 1;
    let mut v = vec![0isize; 2 * limit + 3];
    // trace[d] holds v[-d..=d] as it stood before round d.
    let mut trace: Vec<Vec<isize>> = Vec::new();

    for d in 0..=limit {
        let d_isize = d as isize;
        trace.push(v[(offset - d_isize) as usize..=(offset + d_isize) as usize].to_vec());

        let mut k = -d_isize;
        while k <= d_isize {
            let mut x = if k == -d_isize
                || (k != d_isize && v[(k - 1 + offset) as usize] < v[(k + 1 + offset) as usize])
            {
                v[(k + 1 + offset) as usize]
            } else {
                v[(k - 1 + offset) as usize] + 1
            };
            let mut y = x - k;

            while x < old_len as isize
                && y < new_len as isize
                && old_lines[x as usize] == new_lines[y as usize]
            {
                x += 1;
                y += 1;
            }

            v[(k + offset) as usize] = x;

            if x >= old_len as isize && y >= new_len as isize {
                return Some(backtrack(old_lines, new_lines, &trace, d));
            }

            k += 2;
        }
    }

    None
}

fn backtrack<'a>(
    old_lines: &[&'a str],
    new_lines: &[&'a str],
    trace: &[Vec<isize>],
    solved_d: usize,
) -> Vec<LineEdit<'a>> {
    let mut edits = Vec::new();
    let mut x = old_lines.len() as isize;
    let mut y = new_lines.len() as isize;

    for d in (0..=solved_d).rev() {
        let d_isize = d as isize;
        let at = |k: isize| trace[d][(k + d_isize) as usize];
        let k = x - y;

        let prev_k = if d == 0 {
            0
        } else if k == -d_isize || (k != d_isize && at(k - 1) < at(k + 1)) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = if d == 0 { 0 } else { at(prev_k) };
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            edits.push(LineEdit::Equal(old_lines[(x - 1) as usize]));
            x -= 1;
            y -= 1;
        }

        if d == 0 {
            break;
        }

        if x == prev_x {
            edits.push(LineEdit::Insert(new_lines[(y - 1) as usize]));
            y -= 1;
        } else {
            edits.push(LineEdit::Delete(old_lines[(x - 1) as usize]));
            x -= 1;
        }
    }

    edits.reverse();
    edits
}
