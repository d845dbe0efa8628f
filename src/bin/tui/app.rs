use sheet_bridge::sheet::SheetGrid;
use sheet_bridge::{Destination, JobRequest, PriceSummary, Severity, StatusEvent};

// ---------------------------------------------------------------------------
// Input focus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    SiteUrl,
    Keywords,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Focus::SiteUrl => Focus::Keywords,
            Focus::Keywords => Focus::SiteUrl,
        }
    }
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub site_url: String,
    pub keywords: String,
    pub destination: Destination,
    pub focus: Focus,
    /// Latest status line; `None` until the first search.
    pub status: Option<(String, Severity)>,
    pub summary: PriceSummary,
    pub running: bool,
    pub sheets: Vec<String>,
    pub sheet: SheetGrid,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            keywords: String::new(),
            destination: Destination::default(),
            focus: Focus::SiteUrl,
            status: None,
            summary: PriceSummary::default(),
            running: false,
            sheets: Vec::new(),
            sheet: SheetGrid::default(),
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    fn focused_mut(&mut self) -> &mut String {
        match self.focus {
            Focus::SiteUrl => &mut self.site_url,
            Focus::Keywords => &mut self.keywords,
        }
    }

    pub fn push_char(&mut self, c: char) {
        self.focused_mut().push(c);
    }

    pub fn backspace(&mut self) {
        self.focused_mut().pop();
    }

    pub fn toggle_destination(&mut self) {
        self.destination = self.destination.toggled();
    }

    /// Build the request for a new search, or explain why not. A second
    /// search is refused while one is running.
    pub fn start_search(&mut self) -> Option<JobRequest> {
        if self.running {
            self.status = Some(("A search is already running.".to_string(), Severity::Error));
            return None;
        }
        let url = self.site_url.trim();
        if url.is_empty() {
            self.status = Some(("Enter a site URL first.".to_string(), Severity::Error));
            return None;
        }
        let request = JobRequest::new(url, self.keywords.trim(), self.destination);
        self.running = true;
        self.summary = PriceSummary::default();
        Some(request)
    }

    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Status { message, severity } => self.status = Some((message, severity)),
            StatusEvent::Summary(summary) => self.summary = summary,
        }
    }

    /// Index of the displayed sheet within `sheets`, for the title.
    pub fn sheet_position(&self) -> Option<usize> {
        self.sheets.iter().position(|s| s.eq_ignore_ascii_case(&self.sheet.name))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Neighbour of `current` in tab order, wrapping at either end.
pub fn cycle_sheet(sheets: &[String], current: &str, forward: bool) -> Option<String> {
    if sheets.is_empty() {
        return None;
    }
    let len = sheets.len();
    let idx = sheets
        .iter()
        .position(|s| s.eq_ignore_ascii_case(current))
        .unwrap_or(0);
    let next = if forward { (idx + 1) % len } else { (idx + len - 1) % len };
    Some(sheets[next].clone())
}

/// Placeholder for a price box that has no value yet.
pub fn price_or_dash(v: &str) -> &str {
    if v.is_empty() {
        "—"
    } else {
        v
    }
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let t: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{t}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle_on_url_field() {
        let app = AppState::default();
        assert_eq!(app.focus, Focus::SiteUrl);
        assert_eq!(app.destination, Destination::NewSheet);
        assert!(!app.running);
        assert!(app.status.is_none());
    }

    #[test]
    fn typing_goes_to_focused_field() {
        let mut app = AppState::new();
        app.push_char('a');
        app.focus = app.focus.next();
        app.push_char('b');
        app.push_char('c');
        app.backspace();
        assert_eq!(app.site_url, "a");
        assert_eq!(app.keywords, "b");
    }

    #[test]
    fn search_requires_url_and_refuses_reentry() {
        let mut app = AppState::new();
        assert!(app.start_search().is_none());
        assert_eq!(app.status.as_ref().map(|(_, s)| *s), Some(Severity::Error));

        app.site_url = " https://shop.example ".to_string();
        app.keywords = "gpu".to_string();
        app.toggle_destination();
        let req = app.start_search().unwrap();
        assert_eq!(req.target_url, "https://shop.example");
        assert_eq!(req.destination, Destination::ActiveSheet);
        assert!(app.running);

        assert!(app.start_search().is_none());
        assert_eq!(
            app.status.as_ref().map(|(m, _)| m.as_str()),
            Some("A search is already running.")
        );
    }

    #[test]
    fn status_events_update_display() {
        let mut app = AppState::new();
        app.apply(StatusEvent::Status {
            message: "Searching...".to_string(),
            severity: Severity::Normal,
        });
        app.apply(StatusEvent::Summary(PriceSummary {
            lowest: "$5".to_string(),
            ..PriceSummary::default()
        }));
        assert_eq!(app.status, Some(("Searching...".to_string(), Severity::Normal)));
        assert_eq!(app.summary.lowest, "$5");
    }

    #[test]
    fn sheet_cycling_wraps() {
        let sheets = vec!["Sheet1".to_string(), "New Sheet".to_string(), "New Sheet 1".to_string()];
        assert_eq!(cycle_sheet(&sheets, "Sheet1", true).as_deref(), Some("New Sheet"));
        assert_eq!(cycle_sheet(&sheets, "New Sheet 1", true).as_deref(), Some("Sheet1"));
        assert_eq!(cycle_sheet(&sheets, "sheet1", false).as_deref(), Some("New Sheet 1"));
        assert_eq!(cycle_sheet(&[], "Sheet1", true), None);
    }

    #[test]
    fn truncate_and_placeholder() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
        assert_eq!(price_or_dash(""), "—");
        assert_eq!(price_or_dash("$1"), "$1");
    }
}
