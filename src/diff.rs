//! A shortest-edit-script diff over UTF-16 code units, producing a
//! [`Patch`]. Myers' O(ND) algorithm with the Hirschberg linear-space
//! refinement: find the middle snake, recurse on both halves. The edit
//! distance is capped; past the cap the diff degrades to a single
//! whole-document change.
//!
//! The conversion into a patch is careful never to leave a change boundary
//! between a `\r` and its `\n`: a match starting or ending inside a CRLF pair
//! is narrowed with a same-size synchronisation splice so the pair always
//! travels with an adjacent change.

use log::debug;

use crate::patch::Patch;
use crate::point::Point;
use crate::text::{Text, CR, LF};

const MAX_EDIT_DISTANCE: i32 = 4 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DiffOp {
    Match,
    Delete,
    Insert,
}

#[derive(Copy, Clone, Debug)]
struct DiffEdit {
    op: DiffOp,
    // Offset into `a` for matches and deletions, into `b` for insertions.
    off: i32,
    len: i32,
}

struct MiddleSnake {
    x: i32,
    y: i32,
    u: i32,
    v: i32,
}

// The two diagonal frontiers, stored sparsely: -N..N packs into 0..4N with
// the forward and reverse values interleaved.
struct DiffContext {
    buf: Vec<i32>,
    dmax: i32,
}

impl DiffContext {
    fn index(k: i32, r: i32) -> usize {
        (if k <= 0 { -k * 4 + r } else { k * 4 + (r - 2) }) as usize
    }

    fn set_v(&mut self, k: i32, r: i32, value: i32) {
        let j = Self::index(k, r);
        if self.buf.len() < j + 1 {
            self.buf.resize(j + 1, 0);
        }
        self.buf[j] = value;
    }

    fn forward(&self, k: i32) -> i32 {
        self.buf.get(Self::index(k, 0)).copied().unwrap_or(0)
    }

    fn reverse(&self, k: i32) -> i32 {
        self.buf.get(Self::index(k, 1)).copied().unwrap_or(0)
    }
}

fn record_edit(ses: &mut Vec<DiffEdit>, op: DiffOp, off: i32, len: i32) {
    match ses.last_mut() {
        Some(edit) if edit.op == op => edit.len += len,
        _ => ses.push(DiffEdit { op, off, len }),
    }
}

fn find_middle_snake(
    a: &[u16],
    aoff: i32,
    n: i32,
    b: &[u16],
    boff: i32,
    m: i32,
    ctx: &mut DiffContext,
    ms: &mut MiddleSnake,
) -> i32 {
    let delta = n - m;
    let odd = delta & 1 != 0;
    let mid = (n + m) / 2 + if odd { 1 } else { 0 };

    ctx.set_v(1, 0, 0);
    ctx.set_v(delta - 1, 1, n);

    for d in 0..=mid {
        if 2 * d - 1 >= ctx.dmax {
            return ctx.dmax;
        }

        let mut k = d;
        while k >= -d {
            let mut x = if k == -d || (k != d && ctx.forward(k - 1) < ctx.forward(k + 1)) {
                ctx.forward(k + 1)
            } else {
                ctx.forward(k - 1) + 1
            };
            let mut y = x - k;

            ms.x = x;
            ms.y = y;
            while x < n && y < m && a[(aoff + x) as usize] == b[(boff + y) as usize] {
                x += 1;
                y += 1;
            }
            ctx.set_v(k, 0, x);

            if odd && k >= delta - (d - 1) && k <= delta + (d - 1) && x >= ctx.reverse(k) {
                ms.u = x;
                ms.v = y;
                return 2 * d - 1;
            }
            k -= 2;
        }

        let mut k = d;
        while k >= -d {
            let kr = delta + k;
            let mut x = if k == d || (k != -d && ctx.reverse(kr - 1) < ctx.reverse(kr + 1)) {
                ctx.reverse(kr - 1)
            } else {
                ctx.reverse(kr + 1) - 1
            };
            let mut y = x - kr;

            ms.u = x;
            ms.v = y;
            while x > 0 && y > 0 && a[(aoff + x - 1) as usize] == b[(boff + y - 1) as usize] {
                x -= 1;
                y -= 1;
            }
            ctx.set_v(kr, 1, x);

            if !odd && kr >= -d && kr <= d && x <= ctx.forward(kr) {
                ms.x = x;
                ms.y = y;
                return 2 * d;
            }
            k -= 2;
        }
    }

    -1
}

fn shortest_edit_script(
    a: &[u16],
    mut aoff: i32,
    mut n: i32,
    b: &[u16],
    mut boff: i32,
    mut m: i32,
    ctx: &mut DiffContext,
    ses: &mut Vec<DiffEdit>,
) -> i32 {
    if n == 0 {
        record_edit(ses, DiffOp::Insert, boff, m);
        return m;
    }
    if m == 0 {
        record_edit(ses, DiffOp::Delete, aoff, n);
        return n;
    }

    let mut ms = MiddleSnake { x: 0, y: 0, u: 0, v: 0 };
    let d = find_middle_snake(a, aoff, n, b, boff, m, ctx, &mut ms);
    if d == -1 {
        return -1;
    }
    if d >= ctx.dmax {
        return ctx.dmax;
    }

    if d > 1 {
        if shortest_edit_script(a, aoff, ms.x, b, boff, ms.y, ctx, ses) == -1 {
            return -1;
        }
        record_edit(ses, DiffOp::Match, aoff + ms.x, ms.u - ms.x);
        aoff += ms.u;
        boff += ms.v;
        n -= ms.u;
        m -= ms.v;
        if shortest_edit_script(a, aoff, n, b, boff, m, ctx, ses) == -1 {
            return -1;
        }
    } else {
        // Four base cases when the edit distance is one: the single
        // insertion or deletion sits before or after the snake.
        let x = ms.x;
        let u = ms.u;
        if m > n {
            if x == u {
                record_edit(ses, DiffOp::Match, aoff, n);
                record_edit(ses, DiffOp::Insert, boff + (m - 1), 1);
            } else {
                record_edit(ses, DiffOp::Insert, boff, 1);
                record_edit(ses, DiffOp::Match, aoff, n);
            }
        } else if x == u {
            record_edit(ses, DiffOp::Match, aoff, m);
            record_edit(ses, DiffOp::Delete, aoff + (n - 1), 1);
        } else {
            record_edit(ses, DiffOp::Delete, aoff, 1);
            record_edit(ses, DiffOp::Match, aoff + 1, m);
        }
    }

    d
}

// Compute the shortest edit script between two unit sequences. Returns the
// edit distance, or `dmax` when the cap was hit (the script is then
// incomplete and must be discarded).
fn diff_units(a: &[u16], b: &[u16], dmax: i32, ses: &mut Vec<DiffEdit>) -> i32 {
    let mut ctx = DiffContext { buf: Vec::new(), dmax };

    // Eat any common prefix: the recursion assumes the script begins or ends
    // with an insert or delete, and entirely-equal sequences stay cheap.
    let mut x = 0;
    while x < a.len().min(b.len()) as i32 && a[x as usize] == b[x as usize] {
        x += 1;
    }
    record_edit(ses, DiffOp::Match, 0, x);

    shortest_edit_script(a, x, a.len() as i32 - x, b, x, b.len() as i32 - x, &mut ctx, ses)
}

fn previous_column(position: Point) -> Point {
    debug_assert!(position.column > 0);
    Point::new(position.row, position.column - 1)
}

/// Diff two texts, producing a patch whose old space is `old_text` and whose
/// new space is `new_text`. Every change carries its literal deleted and
/// inserted text.
pub fn text_diff(old_text: &Text, new_text: &Text) -> Patch {
    let mut result = Patch::new(true);

    let mut edit_script = Vec::new();
    let edit_distance =
        diff_units(&old_text.content, &new_text.content, MAX_EDIT_DISTANCE, &mut edit_script);

    if edit_distance == -1 || edit_distance >= MAX_EDIT_DISTANCE {
        debug!("edit distance exceeded {}; emitting a whole-document change", MAX_EDIT_DISTANCE);
        result.splice_impl(
            Point::zero(),
            old_text.extent(),
            new_text.extent(),
            Some(old_text.clone()),
            Some(new_text.clone()),
            0,
        );
        return result;
    }

    let cr = Text::from("\r");
    let lf = Text::from("\n");
    let empty = Text::new();

    let mut old_offset: u32 = 0;
    let mut new_offset: u32 = 0;
    let mut old_position = Point::zero();
    let mut new_position = Point::zero();

    for edit in &edit_script {
        match edit.op {
            DiffOp::Match => {
                if edit.len == 0 {
                    continue;
                }

                // If the previous change ended between a CR and an LF, expand
                // that change downward to include the LF.
                if new_text.at(new_offset) == LF
                    && ((old_offset > 0 && old_text.at(old_offset - 1) == CR)
                        || (new_offset > 0 && new_text.at(new_offset - 1) == CR))
                {
                    result.splice_impl(
                        new_position,
                        Point::new(1, 0),
                        Point::new(1, 0),
                        Some(lf.clone()),
                        Some(lf.clone()),
                        0,
                    );
                    old_position = Point::new(old_position.row + 1, 0);
                    new_position = Point::new(new_position.row + 1, 0);
                }

                old_offset += edit.len as u32;
                new_offset += edit.len as u32;
                old_position = old_text.position_for_offset(old_offset, 0, false);
                new_position = new_text.position_for_offset(new_offset, 0, false);

                // If the next change starts between a CR and an LF, expand
                // that change leftward to include the CR.
                if new_text.at(new_offset - 1) == CR
                    && ((old_offset < old_text.size() && old_text.at(old_offset) == LF)
                        || (new_offset < new_text.size() && new_text.at(new_offset) == LF))
                {
                    result.splice_impl(
                        previous_column(new_position),
                        Point::new(0, 1),
                        Point::new(0, 1),
                        Some(cr.clone()),
                        Some(cr.clone()),
                        0,
                    );
                }
            }

            DiffOp::Delete => {
                let deletion_end = old_offset + edit.len as u32;
                let deleted_text = Text::from_units(
                    old_text.content[old_offset as usize..deletion_end as usize].to_vec(),
                );
                old_offset = deletion_end;
                let next_old_position = old_text.position_for_offset(old_offset, 0, false);
                result.splice_impl(
                    new_position,
                    next_old_position.traversal(old_position),
                    Point::zero(),
                    Some(deleted_text),
                    Some(empty.clone()),
                    0,
                );
                old_position = next_old_position;
            }

            DiffOp::Insert => {
                let insertion_end = new_offset + edit.len as u32;
                let inserted_text = Text::from_units(
                    new_text.content[new_offset as usize..insertion_end as usize].to_vec(),
                );
                new_offset = insertion_end;
                let next_new_position = new_text.position_for_offset(new_offset, 0, false);
                result.splice_impl(
                    new_position,
                    Point::zero(),
                    next_new_position.traversal(new_position),
                    Some(empty.clone()),
                    Some(inserted_text),
                    0,
                );
                new_position = next_new_position;
            }
        }
    }

    result
}
