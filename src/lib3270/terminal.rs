//! Terminal capabilities
//!
//! Derived from the telnet terminal type name (`IBM-<model>-<size>[-E]`,
//! optionally followed by `@<LU name>`) and refined by the terminal's
//! answer to a WSF query.

use log::info;

use super::address::ScreenSize;
use super::query::QueryReply;
use crate::protocol_common::ebcdic::ascii_to_ebcdic_vec;
use crate::protocol_common::telnet_base::TN_EOR;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalCapabilities {
    /// Terminal type without the LU name part
    pub terminal_type: String,
    pub lu_name: Option<String>,
    /// The terminal can be driven by the console
    pub is_3270_mode: bool,
    /// The terminal understands extended data stream orders (WSF query allowed)
    pub can_extended: bool,
    pub can_colors: bool,
    pub can_ext_highlight: bool,
    pub can_alt_screen_size: bool,
    pub alt_rows: usize,
    pub alt_cols: usize,
    /// Number of colors reported by the query, 0 if not queried
    pub color_count: u16,
}

impl TerminalCapabilities {
    /// Classify a terminal type name as sent in `SB TERMINAL-TYPE IS`.
    ///
    /// ```
    /// use mecaff::lib3270::TerminalCapabilities;
    ///
    /// let caps = TerminalCapabilities::from_terminal_type("IBM-3278-4-E@L0A1");
    /// assert!(caps.is_3270_mode && caps.can_extended);
    /// assert_eq!((caps.alt_rows, caps.alt_cols), (43, 80));
    /// assert_eq!(caps.lu_name.as_deref(), Some("L0A1"));
    /// ```
    pub fn from_terminal_type(raw: &str) -> Self {
        let mut caps = Self::default();
        let mut lu_split = raw.split('@');
        caps.terminal_type = lu_split.next().unwrap_or_default().to_string();
        caps.lu_name = lu_split.next().filter(|lu| !lu.is_empty()).map(str::to_string);

        let parts: Vec<&str> = caps.terminal_type.split('-').collect();
        let is_ibm_model = parts.len() > 2
            && parts[0] == "IBM"
            && !parts[1].is_empty()
            && parts[1].chars().all(|c| c.is_ascii_digit());

        if is_ibm_model {
            match parts[1] {
                "3277" => caps.is_3270_mode = true,
                "3278" => {
                    caps.is_3270_mode = true;
                    caps.can_ext_highlight = true;
                }
                "3279" => {
                    caps.is_3270_mode = true;
                    caps.can_ext_highlight = true;
                    caps.can_colors = true;
                }
                _ => {}
            }
            match parts[2] {
                // 12x40 is not supported
                "1" => caps.is_3270_mode = false,
                "3" | "4" | "5" => {
                    if let Some(size) = parts[2].chars().next().and_then(ScreenSize::from_model_digit) {
                        caps.can_alt_screen_size = true;
                        caps.alt_rows = size.rows();
                        caps.alt_cols = size.cols();
                    }
                }
                _ => {}
            }
            caps.can_extended = parts.len() > 3 && parts[3] == "E";
        } else if caps.terminal_type == "IBM-DYNAMIC" {
            caps.can_extended = true;
        }
        caps
    }

    /// Take over the geometry and color/highlight support from a query reply,
    /// provided the usable area is at least 80x24.
    pub fn apply_query_reply(&mut self, reply: &QueryReply, min_color_count: u16) {
        self.color_count = reply.color_count;
        if !reply.has_usable_area() {
            return;
        }
        self.is_3270_mode = true;
        if reply.usable_height > 24 || reply.usable_width > 80 {
            self.can_alt_screen_size = true;
            self.alt_cols = reply.usable_width as usize;
            self.alt_rows = reply.usable_height as usize;
        }
        self.can_ext_highlight = reply.highlight_count >= 3;
        self.can_colors = reply.color_count >= min_color_count;
    }

    pub fn log_summary(&self, conn_no: u32) {
        info!(
            "{{{conn_no:02}}} Terminal props: rows = {}, cols = {}, colors: {} (color count: {}), extHighlight: {}",
            self.alt_rows,
            self.alt_cols,
            if self.can_colors { "yes" } else { "no" },
            self.color_count,
            if self.can_ext_highlight { "yes" } else { "no" },
        );
    }

    /// Erase/Write record telling the user that the terminal cannot be used.
    pub fn unsupported_screen(&self) -> Vec<u8> {
        let mut out = vec![0xF5, 0x00];
        out.extend(ascii_to_ebcdic_vec(&format!(
            "Terminal type '{}' not supported (or -noDynamic is used), sorry",
            self.terminal_type
        )));
        out.extend_from_slice(&TN_EOR);
        out
    }
}
