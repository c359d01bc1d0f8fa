//! Scrollback buffer for the console output zone
//!
//! Lines are kept as EBCDIC bytes together with a tag telling how they are
//! displayed. A line longer than the screen width wraps over several rows,
//! the visible frame is the range of lines filling at most one page of rows.

use std::collections::VecDeque;

/// Origin of an output line, selecting its display attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    HostOutput,
    UserInput,
    /// Host output that arrived while a fullscreen program owned the screen
    FullScreenBacklog,
}

#[derive(Debug, Clone)]
struct Line {
    text: Vec<u8>,
    tag: LineTag,
    rows: usize,
}

#[derive(Debug, Clone)]
pub struct LineBuffer {
    cols: usize,
    rows_in_page: usize,
    max_lines: usize,
    max_line_length: usize,
    lines: VecDeque<Line>,
    last_visible: usize,
    count_visible: usize,
    rows_visible: usize,
}

impl LineBuffer {
    /// Buffer keeping at most `max_lines` lines (never less than one page)
    /// for a page of `rows_in_page` rows with `cols` columns each.
    ///
    /// `rows_in_page` is raised to 4 if smaller.
    pub fn new(max_lines: usize, cols: usize, rows_in_page: usize) -> Self {
        let rows_in_page = rows_in_page.max(4);
        let cols = cols.max(1);
        Self {
            cols,
            rows_in_page,
            max_lines: max_lines.max(rows_in_page),
            max_line_length: cols * rows_in_page,
            lines: VecDeque::new(),
            last_visible: 0,
            count_visible: 0,
            rows_visible: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a line and show the youngest page, returning the number of
    /// rows the line occupies.
    pub fn append(&mut self, text: &[u8], tag: LineTag) -> usize {
        if self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        let count = text.len().min(self.max_line_length);
        let rows = if count == 0 { 1 } else { (count - 1) / self.cols + 1 };
        self.lines.push_back(Line {
            text: text[..count].to_vec(),
            tag,
            rows,
        });
        self.last_visible = self.lines.len() + 2;
        self.recompute_visible_frame();
        rows
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.last_visible = 0;
        self.count_visible = 0;
        self.rows_visible = 0;
    }

    /// Drop all but the `keep` youngest lines.
    pub fn clear_uplines(&mut self, keep: usize) {
        if keep == 0 {
            self.clear();
            return;
        }
        let drop = self.lines.len().saturating_sub(keep);
        self.lines.drain(..drop);
        self.last_visible = 0;
        self.recompute_visible_frame();
    }

    pub fn page_towards_youngest(&mut self) {
        let mut new_rows = 0;
        while self.last_visible + 1 < self.lines.len() {
            let next = self.lines[self.last_visible + 1].rows;
            if new_rows + next > self.rows_in_page {
                break;
            }
            self.last_visible += 1;
            new_rows += next;
        }
        self.recompute_visible_frame();
    }

    pub fn page_towards_oldest(&mut self) {
        self.last_visible = self.last_visible.saturating_sub(self.count_visible);
        self.recompute_visible_frame();
    }

    pub fn page_to_youngest(&mut self) {
        self.last_visible = self.lines.len() + 2;
        self.recompute_visible_frame();
    }

    pub fn page_to_oldest(&mut self) {
        self.last_visible = 0;
        self.recompute_visible_frame();
    }

    /// Lines of the visible frame, oldest first.
    pub fn page_lines(&self) -> impl Iterator<Item = (&[u8], LineTag)> + '_ {
        let first = (self.last_visible + 1).saturating_sub(self.count_visible);
        self.lines
            .range(first..first + self.count_visible)
            .map(|line| (line.text.as_slice(), line.tag))
    }

    /// The `count` youngest lines, oldest first.
    pub fn youngest_lines(&self, count: usize) -> impl Iterator<Item = (&[u8], LineTag)> + '_ {
        let first = self.lines.len().saturating_sub(count);
        self.lines.range(first..).map(|line| (line.text.as_slice(), line.tag))
    }

    pub fn visible_count(&self) -> usize {
        self.count_visible
    }

    pub fn visible_rows(&self) -> usize {
        self.rows_visible
    }

    /// Retag up to `count` of the youngest lines from `from` to `to`.
    ///
    /// The oldest line in the buffer is never retagged.
    pub fn update_last_line_tags(&mut self, count: usize, from: LineTag, to: LineTag) {
        for line in self.lines.iter_mut().skip(1).rev().take(count) {
            if line.tag == from {
                line.tag = to;
            }
        }
    }

    fn recompute_visible_frame(&mut self) {
        self.count_visible = 0;
        self.rows_visible = 0;
        if self.lines.is_empty() {
            self.last_visible = 0;
            return;
        }
        self.last_visible = self.last_visible.min(self.lines.len() - 1);

        // walk back from the last visible line while the rows fit
        let mut stopped_at = None;
        for idx in (0..=self.last_visible).rev() {
            let rows = self.lines[idx].rows;
            if self.rows_visible + rows > self.rows_in_page {
                stopped_at = Some(idx);
                break;
            }
            self.count_visible += 1;
            self.rows_visible += rows;
        }
        if matches!(stopped_at, Some(idx) if idx > 0) {
            return;
        }

        // reached the oldest line: fill the page from there
        self.last_visible = 0;
        self.count_visible = 1;
        self.rows_visible = self.lines[0].rows;
        while self.last_visible + 1 < self.lines.len() {
            let next = self.lines[self.last_visible + 1].rows;
            if self.rows_visible + next > self.rows_in_page {
                break;
            }
            self.last_visible += 1;
            self.count_visible += 1;
            self.rows_visible += next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(buffer: &LineBuffer) -> Vec<Vec<u8>> {
        buffer.page_lines().map(|(t, _)| t.to_vec()).collect()
    }

    #[test]
    fn test_empty_buffer() {
        let mut b = LineBuffer::new(10, 80, 4);
        b.page_to_oldest();
        b.page_towards_youngest();
        assert_eq!(b.visible_count(), 0);
        assert_eq!(texts(&b).len(), 0);
    }

    #[test]
    fn test_wrapped_rows() {
        let mut b = LineBuffer::new(10, 10, 4);
        assert_eq!(b.append(&[], LineTag::HostOutput), 1);
        assert_eq!(b.append(&[0xC1; 10], LineTag::HostOutput), 1);
        assert_eq!(b.append(&[0xC1; 11], LineTag::HostOutput), 2);
        // capped at one page
        assert_eq!(b.append(&[0xC1; 100], LineTag::HostOutput), 4);
    }

    #[test]
    fn test_youngest_page_after_append() {
        let mut b = LineBuffer::new(100, 80, 4);
        for i in 0..10u8 {
            b.append(&[i], LineTag::HostOutput);
        }
        assert_eq!(texts(&b), vec![vec![6], vec![7], vec![8], vec![9]]);
        assert_eq!(b.visible_rows(), 4);
    }

    #[test]
    fn test_paging() {
        let mut b = LineBuffer::new(100, 80, 4);
        for i in 0..10u8 {
            b.append(&[i], LineTag::HostOutput);
        }
        b.page_towards_oldest();
        assert_eq!(texts(&b), vec![vec![2], vec![3], vec![4], vec![5]]);
        b.page_towards_oldest();
        // anchored at the oldest line
        assert_eq!(texts(&b), vec![vec![0], vec![1], vec![2], vec![3]]);
        b.page_towards_youngest();
        assert_eq!(texts(&b), vec![vec![4], vec![5], vec![6], vec![7]]);
        b.page_to_youngest();
        assert_eq!(texts(&b)[3], vec![9]);
        b.page_to_oldest();
        assert_eq!(texts(&b)[0], vec![0]);
    }

    #[test]
    fn test_max_lines_drops_oldest() {
        let mut b = LineBuffer::new(5, 80, 4);
        for i in 0..8u8 {
            b.append(&[i], LineTag::HostOutput);
        }
        assert_eq!(b.len(), 5);
        b.page_to_oldest();
        assert_eq!(texts(&b)[0], vec![3]);
    }

    #[test]
    fn test_clear_uplines() {
        let mut b = LineBuffer::new(100, 80, 4);
        for i in 0..6u8 {
            b.append(&[i], LineTag::HostOutput);
        }
        b.clear_uplines(1);
        assert_eq!(texts(&b), vec![vec![5]]);
        b.clear_uplines(0);
        assert!(b.is_empty());
    }

    #[test]
    fn test_update_last_line_tags() {
        let mut b = LineBuffer::new(100, 80, 4);
        for _ in 0..4 {
            b.append(b"x", LineTag::FullScreenBacklog);
        }
        b.update_last_line_tags(10, LineTag::FullScreenBacklog, LineTag::HostOutput);
        let tags: Vec<LineTag> = b.page_lines().map(|(_, t)| t).collect();
        assert_eq!(
            tags,
            vec![
                LineTag::FullScreenBacklog,
                LineTag::HostOutput,
                LineTag::HostOutput,
                LineTag::HostOutput
            ]
        );
    }

    #[test]
    fn test_youngest_lines() {
        let mut b = LineBuffer::new(100, 80, 4);
        b.append(b"a", LineTag::UserInput);
        b.append(b"b", LineTag::HostOutput);
        b.append(b"c", LineTag::HostOutput);
        let young: Vec<(Vec<u8>, LineTag)> = b.youngest_lines(2).map(|(t, tag)| (t.to_vec(), tag)).collect();
        assert_eq!(young, vec![(b"b".to_vec(), LineTag::HostOutput), (b"c".to_vec(), LineTag::HostOutput)]);
        assert_eq!(b.youngest_lines(10).count(), 3);
    }
}
