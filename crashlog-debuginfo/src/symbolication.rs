use std::fmt;

use crashlog_common::Language;

/// The result of resolving an instruction address.
///
/// A lookup that finds no covering function yields [`SymbolicationData::not_found`], which is a
/// regular result and not an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolicationData {
    /// Whether the address was resolved to a function.
    pub found: bool,
    /// Name of the function containing the address.
    pub symbol: Option<String>,
    /// The source file as recorded in the debug information, relative to the compilation
    /// directory when the compiler recorded it that way.
    pub file: Option<String>,
    /// The absolute path of the source file, resolved against the compilation directory.
    pub abs_path: Option<String>,
    /// The source line, if known.
    pub line: Option<u64>,
    /// The language of the compilation unit.
    pub language: Language,
    /// The looked up address.
    ///
    /// The symbolicator reports this relative to the image's load address.
    pub address: u64,
}

impl SymbolicationData {
    /// Creates a result for an address that could not be resolved.
    pub fn not_found(address: u64) -> Self {
        SymbolicationData {
            address,
            ..Default::default()
        }
    }

    /// Creates a result that only carries a symbol name, for instance from a symbol table.
    pub fn from_symbol(address: u64, symbol: impl Into<String>) -> Self {
        SymbolicationData {
            found: true,
            symbol: Some(symbol.into()),
            address,
            ..Default::default()
        }
    }
}

impl fmt::Display for SymbolicationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.found {
            return write!(f, "{:#x} <unknown>", self.address);
        }

        write!(
            f,
            "{:#x} {}",
            self.address,
            self.symbol.as_deref().unwrap_or("<unknown>")
        )?;

        if let Some(ref file) = self.file {
            write!(f, " ({file}")?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
            write!(f, ")")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            SymbolicationData::not_found(0x1020).to_string(),
            "0x1020 <unknown>"
        );
        assert_eq!(
            SymbolicationData::from_symbol(0x1200, "no_debug").to_string(),
            "0x1200 no_debug"
        );

        let data = SymbolicationData {
            found: true,
            symbol: Some("main".into()),
            file: Some("main.c".into()),
            abs_path: Some("/src/app/main.c".into()),
            line: Some(42),
            language: Language::C,
            address: 0x1020,
        };
        assert_eq!(data.to_string(), "0x1020 main (main.c:42)");
    }
}
