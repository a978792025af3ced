use crate::error::Span;

/// Source location of the instructions starting at `index`.
///
/// A cleared entry marks compiler-generated code with no location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub index: usize,
    pub span: Span,
    pub file_name: String,
    pub is_clear: bool,
}

impl DebugInfo {
    pub fn new(index: usize, file_name: impl Into<String>, span: Span) -> Self {
        Self {
            index,
            span,
            file_name: file_name.into(),
            is_clear: false,
        }
    }

    pub fn clear(index: usize) -> Self {
        Self {
            index,
            span: Span::default(),
            file_name: String::new(),
            is_clear: true,
        }
    }

    /// The entry covering `index` in a list sorted by index.
    pub fn lookup(infos: &[DebugInfo], index: usize) -> Option<&DebugInfo> {
        let position = match infos.binary_search_by_key(&index, |info| info.index) {
            Ok(position) => position,
            Err(0) => return None,
            Err(insert_at) => insert_at - 1,
        };
        let info = &infos[position];
        if info.is_clear {
            None
        } else {
            Some(info)
        }
    }
}
