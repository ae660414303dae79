/// Classifies free-text device reports as activation events.
///
/// The marker set is an allow-list taken from configuration; a report is an
/// activation if it contains any marker as a substring.
#[derive(Debug, Clone)]
pub struct EventExtractor {
    markers: Vec<String>,
}

impl EventExtractor {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.is_empty())
            .collect();
        EventExtractor { markers }
    }

    pub fn is_activation(&self, report: Option<&str>) -> bool {
        match report {
            Some(report) if !report.is_empty() => {
                self.markers.iter().any(|m| report.contains(m.as_str()))
            }
            _ => false,
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}
