/// A message selector of the form `"<name>:<argCount>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector<'a> {
    pub text: &'a str,
    pub arg_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("selector {0:?} has no ':' before its argument count")]
    MissingColon(String),
    #[error("selector {0:?} has no argument count")]
    MissingCount(String),
    #[error("selector {0:?} has a non-digit in its argument count")]
    NonDigit(String),
    #[error("selector {0:?} argument count overflows")]
    Overflow(String),
}

impl<'a> Selector<'a> {
    pub fn parse(text: &'a str) -> Result<Self, SelectorError> {
        Ok(Self {
            text,
            arg_count: argument_count(text)?,
        })
    }

    /// Name part, without the `:<argCount>` suffix.
    pub fn name(&self) -> &'a str {
        match self.text.rfind(':') {
            Some(colon) => &self.text[..colon],
            None => self.text,
        }
    }
}

/// Argument count encoded in a selector.
///
/// Scans backwards from the end of the string until the last colon; every
/// byte on the way must be a decimal digit. The first byte scanned is the
/// least significant digit.
pub fn argument_count(selector: &str) -> Result<u32, SelectorError> {
    let mut count: u64 = 0;
    let mut place: u64 = 1;
    let mut digits = 0;
    for &byte in selector.as_bytes().iter().rev() {
        if byte == b':' {
            if digits == 0 {
                return Err(SelectorError::MissingCount(selector.to_owned()));
            }
            return Ok(count as u32);
        }
        if !byte.is_ascii_digit() {
            return Err(SelectorError::NonDigit(selector.to_owned()));
        }
        count += (byte - b'0') as u64 * place;
        if count > u32::MAX as u64 {
            return Err(SelectorError::Overflow(selector.to_owned()));
        }
        digits += 1;
        // leading zeros may push the place past u32 without changing count
        place = place.saturating_mul(10).min(u32::MAX as u64 + 1);
    }
    Err(SelectorError::MissingColon(selector.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        assert_eq!(argument_count("foo:2"), Ok(2));
        assert_eq!(argument_count("bar:0"), Ok(0));
        assert_eq!(argument_count("at:put:12"), Ok(12));
        assert_eq!(argument_count("x:105"), Ok(105));
    }

    #[test]
    fn non_digit_before_colon() {
        assert!(matches!(
            argument_count("foo:2a"),
            Err(SelectorError::NonDigit(_))
        ));
        assert!(matches!(
            argument_count("foo:x"),
            Err(SelectorError::NonDigit(_))
        ));
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            argument_count("foo"),
            Err(SelectorError::MissingColon(_))
        ));
        assert!(matches!(
            argument_count("foo:"),
            Err(SelectorError::MissingCount(_))
        ));
        assert!(matches!(
            argument_count("f:99999999999"),
            Err(SelectorError::Overflow(_))
        ));
    }

    #[test]
    fn leading_zeros() {
        assert_eq!(argument_count("f:0000000000003"), Ok(3));
    }

    #[test]
    fn name_part() {
        let s = Selector::parse("set:1").expect("valid selector");
        assert_eq!(s.name(), "set");
        assert_eq!(s.arg_count, 1);
        assert_eq!(Selector::parse("at:put:2").map(|s| s.name()), Ok("at:put"));
        assert!(Selector::parse("foo:x").is_err());
    }
}
