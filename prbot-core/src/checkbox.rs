//! Markdown task-list toggling.

const UNCHECKED: &str = "- [ ]";
const CHECKED: &str = "- [x]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckboxOutcome {
    /// The body is empty or whitespace.
    NoDescription,
    /// Nothing left to tick.
    AlreadyChecked,
    /// `count` boxes were ticked; `body` is the rewritten text.
    Updated { body: String, count: usize },
}

/// Tick every unchecked box in `body`.
pub fn check_all(body: &str) -> CheckboxOutcome {
    if body.trim().is_empty() {
        return CheckboxOutcome::NoDescription;
    }
    let count = body.matches(UNCHECKED).count();
    if count == 0 {
        return CheckboxOutcome::AlreadyChecked;
    }
    CheckboxOutcome::Updated {
        body: body.replace(UNCHECKED, CHECKED),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_all() {
        let body = "Steps:\n- [ ] one\n- [x] two\n  - [ ] nested\n";
        assert_eq!(
            check_all(body),
            CheckboxOutcome::Updated {
                body: "Steps:\n- [x] one\n- [x] two\n  - [x] nested\n".into(),
                count: 2,
            }
        );
    }

    #[test]
    fn test_nothing_to_check() {
        assert_eq!(check_all("   \n"), CheckboxOutcome::NoDescription);
        assert_eq!(check_all("- [x] done"), CheckboxOutcome::AlreadyChecked);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let CheckboxOutcome::Updated { body, .. } = check_all("- [ ] a\n- [ ] b") else {
            panic!("expected update");
        };
        assert_eq!(check_all(&body), CheckboxOutcome::AlreadyChecked);
    }
}
