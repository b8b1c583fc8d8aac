#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use opschema_model::{SchemaError, Signature};
use opschema_solve::DEFAULT_RANK_CAP;

use crate::config::GenConfig;
use crate::decl::ArgSpec;
use crate::schema::Schema;
use crate::table::tabulate;

impl Schema {
    /// One row per index: id, description, allowed ranks and derivation.
    pub fn index_inventory(&self) -> Result<String, SchemaError> {
        let mut rows = vec![vec![
            "index".to_string(),
            "description".to_string(),
            "rank".to_string(),
            "computed as".to_string(),
        ]];
        for info in self.index.iter() {
            let c = info.id;
            let rank = match self.rank_cons.equated_to(c) {
                Some(src) => format!("= rank({src})"),
                None => {
                    let sig = Signature::parse(&c.to_string())?;
                    match self.rank_cons.limit(&sig) {
                        Some(l) if l.min == l.max => l.min.to_string(),
                        Some(l) if l.max >= DEFAULT_RANK_CAP => format!(">= {}", l.min),
                        Some(l) => format!("{}-{}", l.min, l.max),
                        None => "any".to_string(),
                    }
                }
            };
            let derivation = self
                .computed
                .explain(
                    c,
                    &|i| Some(self.index.description(i).to_string()),
                    &|a| Some(a.to_string()),
                )
                .unwrap_or_default();
            rows.push(vec![c.to_string(), info.description.clone(), rank, derivation]);
        }
        Ok(tabulate(&rows, "  ", &[]).join("\n"))
    }

    /// Every distinct categorical configuration the schema accepts: tensor
    /// dtypes, index ranks, data format and option values.
    pub fn call_inventory(&self, cfg: &GenConfig) -> Result<String, SchemaError> {
        let tensors: Vec<&str> = self.data_tensors().collect();
        let options: Vec<&String> = self
            .params
            .iter()
            .filter(|p| matches!(self.specs.get(*p), Some(ArgSpec::Option { .. })))
            .collect();
        let indices = self.indices();

        let mut header: Vec<String> = tensors.iter().map(|t| format!("{t}.dtype")).collect();
        header.extend(indices.iter().map(|c| format!("{c} rank")));
        if let Some(arg) = self.layouts.arg() {
            header.push(arg.to_string());
        }
        header.extend(options.iter().map(|o| o.to_string()));

        let mut seen = BTreeSet::new();
        let mut rows = vec![header];
        for case in self.generate(cfg) {
            let case = case?;
            let mut row: Vec<String> = tensors
                .iter()
                .map(|t| case.dtypes.get(*t).map(|d| d.to_string()).unwrap_or_default())
                .collect();
            row.extend(
                indices
                    .iter()
                    .map(|c| case.ranks.get(c).copied().unwrap_or(0).to_string()),
            );
            if self.layouts.arg().is_some() {
                row.push(case.data_format.clone().unwrap_or_default());
            }
            row.extend(options.iter().map(|o| {
                case.args
                    .get(o)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            }));
            if seen.insert(row.clone()) {
                rows.push(row);
            }
        }
        Ok(tabulate(&rows, "  ", &[]).join("\n"))
    }
}
