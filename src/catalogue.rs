use serde::Serialize;

use crate::domain::CatalogueName;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogueEntry {
    pub name: String,
    pub output: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub enum CatalogueSource<'a> {
    Remote(&'a str),
    Local(&'a Store),
}

impl CatalogueSource<'_> {
    pub fn locate(&self, name: CatalogueName) -> String {
        match self {
            CatalogueSource::Remote(base) => {
                format!("{}/{name}.zip", base.trim_end_matches('/'))
            }
            CatalogueSource::Local(store) => store.archive_path(&name.output_name()).to_string(),
        }
    }

    pub fn entry(&self, name: CatalogueName) -> CatalogueEntry {
        CatalogueEntry {
            name: name.to_string(),
            output: name.output_name(),
            location: self.locate(name),
        }
    }

    pub fn entries(&self) -> Vec<CatalogueEntry> {
        CatalogueName::all()
            .into_iter()
            .map(|name| self.entry(name))
            .collect()
    }
}
