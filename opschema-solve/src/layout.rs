#![forbid(unsafe_code)]

use opschema_model::{IndexId, RankMap, SchemaError, Signature};

/// A named data format such as `NHWC`, bound to a layout code and optionally
/// to one rank of the rank index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFormat {
    pub name: String,
    pub layout: usize,
    pub rank: Option<u32>,
}

/// The layout argument of a schema, if any.
#[derive(Debug, Clone, Default)]
pub struct Layouts {
    arg: Option<String>,
    formats: Vec<DataFormat>,
    rank_index: Option<IndexId>,
}

impl Layouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(
        &mut self,
        arg: &str,
        formats: &[(&str, usize, Option<u32>)],
        rank_index: Option<IndexId>,
    ) -> Result<(), SchemaError> {
        if let Some(prev) = &self.arg {
            return Err(SchemaError::LayoutAlreadyDeclared { name: prev.clone() });
        }
        let invalid = |reason: String| SchemaError::InvalidLayout { reason };
        if formats.is_empty() {
            return Err(invalid(format!("'{arg}' declares no formats")));
        }
        let num = formats.iter().map(|f| f.1).max().unwrap_or(0) + 1;
        for code in 0..num {
            let of_code: Vec<_> = formats.iter().filter(|f| f.1 == code).collect();
            if of_code.is_empty() {
                return Err(invalid(format!(
                    "layout codes must be contiguous from 0, code {code} is unused"
                )));
            }
            if of_code.iter().filter(|f| f.2.is_none()).count() > 1 {
                return Err(invalid(format!(
                    "layout {code} has more than one format without a rank"
                )));
            }
            for (i, a) in of_code.iter().enumerate() {
                if of_code[i + 1..].iter().any(|b| a.2.is_some() && a.2 == b.2) {
                    return Err(invalid(format!(
                        "layout {code} maps rank {:?} to more than one format",
                        a.2
                    )));
                }
            }
        }
        for (i, f) in formats.iter().enumerate() {
            if formats[..i].iter().any(|g| g.0 == f.0) {
                return Err(invalid(format!("format '{}' declared twice", f.0)));
            }
        }
        if rank_index.is_none() && formats.iter().any(|f| f.2.is_some()) {
            return Err(invalid(
                "rank-qualified formats need a rank index".to_string(),
            ));
        }
        self.arg = Some(arg.to_string());
        self.rank_index = rank_index;
        self.formats = formats
            .iter()
            .map(|&(name, layout, rank)| DataFormat {
                name: name.to_string(),
                layout,
                rank,
            })
            .collect();
        Ok(())
    }

    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }

    pub fn rank_index(&self) -> Option<IndexId> {
        self.rank_index
    }

    pub fn formats(&self) -> &[DataFormat] {
        &self.formats
    }

    pub fn num_layouts(&self) -> usize {
        self.formats
            .iter()
            .map(|f| f.layout + 1)
            .max()
            .unwrap_or(1)
    }

    /// Format used when the layout argument is omitted.
    pub fn default_format(&self) -> Option<&DataFormat> {
        self.formats.first()
    }

    pub fn layout(&self, format: &str) -> Option<usize> {
        self.formats.iter().find(|f| f.name == format).map(|f| f.layout)
    }

    pub fn get(&self, format: &str) -> Option<&DataFormat> {
        self.formats.iter().find(|f| f.name == format)
    }

    /// The format of `layout` matching the rank of the rank index. An exact
    /// rank match wins over the layout's catch-all format.
    pub fn data_format(&self, layout: usize, ranks: &RankMap) -> Option<&str> {
        let rank = self.rank_index.and_then(|i| ranks.get(&i).copied());
        let of_layout = || self.formats.iter().filter(move |f| f.layout == layout);
        of_layout()
            .find(|f| f.rank.is_some() && f.rank == rank)
            .or_else(|| of_layout().find(|f| f.rank.is_none()))
            .map(|f| f.name.as_str())
    }

    /// Expands one signature to every layout, or checks there is exactly one
    /// signature per layout.
    pub fn broadcast_sigs(
        &self,
        name: &str,
        sigs: &[Signature],
    ) -> Result<Vec<Signature>, SchemaError> {
        let n = self.num_layouts();
        match sigs.len() {
            1 => Ok(vec![sigs[0].clone(); n]),
            got if got == n => Ok(sigs.to_vec()),
            got => Err(SchemaError::LayoutSignatureCount {
                name: name.to_string(),
                got,
                expected: n,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv_layouts() -> Layouts {
        let mut l = Layouts::new();
        l.configure(
            "data_format",
            &[
                ("NCW", 0, Some(1)),
                ("NCHW", 0, Some(2)),
                ("NCDHW", 0, Some(3)),
                ("NWC", 1, Some(1)),
                ("NHWC", 1, Some(2)),
                ("NDHWC", 1, Some(3)),
            ],
            Some('i'),
        )
        .unwrap();
        l
    }

    #[test]
    fn test_data_format_by_rank() {
        let l = conv_layouts();
        let ranks: RankMap = [('i', 2)].into_iter().collect();
        assert_eq!(l.data_format(0, &ranks), Some("NCHW"));
        assert_eq!(l.data_format(1, &ranks), Some("NHWC"));
        let ranks: RankMap = [('i', 4)].into_iter().collect();
        assert_eq!(l.data_format(1, &ranks), None);
        assert_eq!(l.layout("NDHWC"), Some(1));
        assert_eq!(l.num_layouts(), 2);
    }

    #[test]
    fn test_catch_all_format() {
        let mut l = Layouts::new();
        l.configure(
            "fmt",
            &[
                ("channels_first", 0, None),
                ("NWC", 1, Some(1)),
                ("channels_last", 1, None),
            ],
            Some('s'),
        )
        .unwrap();
        let ranks: RankMap = [('s', 1)].into_iter().collect();
        assert_eq!(l.data_format(1, &ranks), Some("NWC"));
        let ranks: RankMap = [('s', 3)].into_iter().collect();
        assert_eq!(l.data_format(1, &ranks), Some("channels_last"));
        assert_eq!(l.data_format(0, &ranks), Some("channels_first"));
    }

    #[test]
    fn test_invalid_declarations() {
        let mut l = Layouts::new();
        assert!(matches!(
            l.configure("f", &[("A", 0, None), ("B", 0, None)], None),
            Err(SchemaError::InvalidLayout { .. })
        ));
        assert!(matches!(
            l.configure("f", &[("A", 0, None), ("B", 2, None)], None),
            Err(SchemaError::InvalidLayout { .. })
        ));
        let mut l = conv_layouts();
        assert!(matches!(
            l.configure("g", &[("A", 0, None)], None),
            Err(SchemaError::LayoutAlreadyDeclared { .. })
        ));
    }

    #[test]
    fn test_broadcast_sigs() {
        let l = conv_layouts();
        let one = [Signature::parse("flk").unwrap()];
        assert_eq!(l.broadcast_sigs("filters", &one).unwrap().len(), 2);
        let three = [
            Signature::parse("a").unwrap(),
            Signature::parse("b").unwrap(),
            Signature::parse("c").unwrap(),
        ];
        assert!(matches!(
            l.broadcast_sigs("input", &three),
            Err(SchemaError::LayoutSignatureCount { got: 3, expected: 2, .. })
        ));
        assert_eq!(Layouts::new().num_layouts(), 1);
    }
}
