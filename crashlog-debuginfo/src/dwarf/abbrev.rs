use std::collections::BTreeMap;

use gimli::{constants, DwAt, DwForm, DwTag};
use scroll::Endian;

use crate::buffer::{BufferError, Reader};

/// An attribute declared by an abbreviation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeSpec {
    /// The attribute name.
    pub name: DwAt,
    /// The form the value is encoded in.
    pub form: DwForm,
    /// The value of a `DW_FORM_implicit_const` attribute, stored in the abbreviation itself.
    pub implicit_const: Option<i64>,
}

/// The shape of a debugging information entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abbreviation {
    /// The code entries use to refer to this abbreviation.
    pub code: u64,
    /// The tag of entries using this abbreviation.
    pub tag: DwTag,
    /// Whether entries using this abbreviation are followed by children.
    pub has_children: bool,
    /// Attribute declarations in encoding order.
    pub attributes: Vec<AttributeSpec>,
}

/// All abbreviations declared at one offset of `.debug_abbrev`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AbbreviationTable {
    abbreviations: BTreeMap<u64, Abbreviation>,
}

impl AbbreviationTable {
    /// Parses the abbreviation table starting at `offset`.
    pub fn parse(data: &[u8], offset: usize, endian: Endian) -> Result<Self, BufferError> {
        let mut reader = Reader::at(data, offset, endian)?;
        let mut abbreviations = BTreeMap::new();

        loop {
            let code = reader.uleb128()?;
            if code == 0 {
                break;
            }

            let tag = DwTag(reader.uleb128()? as u16);
            let has_children = reader.u8()? == constants::DW_CHILDREN_yes.0;

            let mut attributes = Vec::new();
            loop {
                let name = reader.uleb128()?;
                let form = reader.uleb128()?;
                if name == 0 && form == 0 {
                    break;
                }

                let form = DwForm(form as u16);
                let implicit_const = if form == constants::DW_FORM_implicit_const {
                    Some(reader.sleb128()?)
                } else {
                    None
                };

                attributes.push(AttributeSpec {
                    name: DwAt(name as u16),
                    form,
                    implicit_const,
                });
            }

            abbreviations.entry(code).or_insert(Abbreviation {
                code,
                tag,
                has_children,
                attributes,
            });
        }

        Ok(AbbreviationTable { abbreviations })
    }

    /// Looks up an abbreviation by code.
    pub fn get(&self, code: u64) -> Option<&Abbreviation> {
        self.abbreviations.get(&code)
    }

    /// The number of abbreviations in this table.
    pub fn len(&self) -> usize {
        self.abbreviations.len()
    }

    /// Returns `true` if the table declares no abbreviations.
    pub fn is_empty(&self) -> bool {
        self.abbreviations.is_empty()
    }
}
