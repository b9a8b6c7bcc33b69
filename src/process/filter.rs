/// Keeps rows whose description mentions an expense/claim keyword.
#[derive(Debug, Clone)]
pub struct ExpenseFilter {
    keywords: Vec<String>,
}

impl ExpenseFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.as_ref().trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match. A missing description never matches.
    pub fn matches(&self, description: Option<&str>) -> bool {
        match description {
            Some(text) => {
                let upper = text.to_uppercase();
                self.keywords.iter().any(|k| upper.contains(k.as_str()))
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ExpenseFilter {
        ExpenseFilter::new(&["EVENTO", "SINISTRO", "DESPESA"])
    }

    #[test]
    fn matches_any_keyword_case_insensitively() {
        let f = filter();
        assert!(f.matches(Some("EVENTOS/ SINISTROS CONHECIDOS OU AVISADOS")));
        assert!(f.matches(Some("Despesas com Eventos")));
        assert!(f.matches(Some("provisão de sinistros a liquidar")));
        assert!(!f.matches(Some("Contraprestações Efetivas")));
    }

    #[test]
    fn missing_or_blank_description_is_excluded() {
        let f = filter();
        assert!(!f.matches(None));
        assert!(!f.matches(Some("")));
    }
}
