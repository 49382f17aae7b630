/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * The printers, materials and print priorities the service knows about.  The
 * catalog is an explicit object owned by the caller; nothing here is global.
 */

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use helio_types::OptimizationInput;
use slog::{info, warn, Logger};

/**
 * Upper bound on pages fetched for one list, in case the server keeps
 * claiming there is another page.
 */
const MAX_PAGES: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    /**
     * The name the slicer uses for this item.
     */
    pub native_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityOption {
    pub value: String,
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub entries: Vec<CatalogEntry>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn printers_page(&self, page: u32) -> Result<Page>;
    async fn materials_page(&self, page: u32) -> Result<Page>;
    async fn print_priority_options(&self) -> Result<Vec<PriorityOption>>;
}

#[derive(Default)]
struct Inner {
    printers: Vec<CatalogEntry>,
    materials: Vec<CatalogEntry>,
    priorities: Vec<PriorityOption>,
}

#[derive(Default)]
pub struct Catalog {
    inner: Mutex<Inner>,
}

async fn fetch_all<F, Fut>(mut page: F) -> Result<Vec<CatalogEntry>>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<Page>>,
{
    let mut out = Vec::new();
    for n in 1..=MAX_PAGES {
        let p = page(n).await?;
        out.extend(p.entries);
        if !p.has_next_page {
            break;
        }
    }
    Ok(out)
}

impl Catalog {
    pub fn new() -> Catalog {
        Default::default()
    }

    /**
     * Fetch all three lists.  A list that cannot be fetched is left empty and
     * the failure is logged; the other lists are still populated.
     */
    pub async fn populate(&self, log: &Logger, api: &dyn CatalogApi) {
        let printers = fetch_all(|n| api.printers_page(n)).await;
        let materials = fetch_all(|n| api.materials_page(n)).await;
        let priorities = api.print_priority_options().await;

        let mut i = self.inner.lock().unwrap();
        match printers {
            Ok(v) => {
                info!(log, "catalog has {} printers", v.len());
                i.printers = v;
            }
            Err(e) => warn!(log, "could not list printers: {:?}", e),
        }
        match materials {
            Ok(v) => {
                info!(log, "catalog has {} materials", v.len());
                i.materials = v;
            }
            Err(e) => warn!(log, "could not list materials: {:?}", e),
        }
        match priorities {
            Ok(v) => {
                info!(log, "catalog has {} print priority options", v.len());
                i.priorities = v;
            }
            Err(e) => {
                warn!(log, "could not list print priorities: {:?}", e)
            }
        }
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap() = Default::default();
    }

    pub fn printers(&self) -> Vec<CatalogEntry> {
        self.inner.lock().unwrap().printers.clone()
    }

    pub fn materials(&self) -> Vec<CatalogEntry> {
        self.inner.lock().unwrap().materials.clone()
    }

    pub fn print_priorities(&self) -> Vec<PriorityOption> {
        self.inner.lock().unwrap().priorities.clone()
    }

    pub fn printer_id(&self, native_name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .printers
            .iter()
            .find(|e| e.native_name == native_name)
            .map(|e| e.id.clone())
    }

    pub fn material_id(&self, native_name: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .materials
            .iter()
            .find(|e| e.native_name == native_name)
            .map(|e| e.id.clone())
    }

    /**
     * Servers that predate print priorities offer no options; an input aimed
     * at such a server, or naming a priority the server does not list, must
     * use the legacy outer wall switch instead.  Returns true if the input was
     * changed.
     */
    pub fn apply_priority_fallback(&self, oi: &mut OptimizationInput) -> bool {
        if oi.use_old_method {
            return false;
        }

        let i = self.inner.lock().unwrap();
        let listed = match oi.priority.as_deref() {
            Some(p) => i.priorities.iter().any(|o| o.value == p),
            None => !i.priorities.is_empty(),
        };
        drop(i);

        if listed {
            false
        } else {
            oi.fall_back_to_old_method();
            true
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::bail;
    use helio_common::discard_log;

    fn entry(n: u32) -> CatalogEntry {
        CatalogEntry {
            id: format!("id-{n}"),
            name: format!("Helio {n}"),
            native_name: format!("Native {n}"),
        }
    }

    struct Paged {
        pages: u32,
        priorities: Option<Vec<PriorityOption>>,
    }

    #[async_trait]
    impl CatalogApi for Paged {
        async fn printers_page(&self, page: u32) -> Result<Page> {
            Ok(Page {
                entries: vec![entry(page * 10), entry(page * 10 + 1)],
                has_next_page: page < self.pages,
            })
        }

        async fn materials_page(&self, _page: u32) -> Result<Page> {
            bail!("status: 500, error: boom");
        }

        async fn print_priority_options(&self) -> Result<Vec<PriorityOption>> {
            match &self.priorities {
                Some(p) => Ok(p.clone()),
                None => bail!("unknown field printPriorityOptions"),
            }
        }
    }

    fn quality() -> PriorityOption {
        PriorityOption {
            value: "QUALITY".into(),
            label: "Quality".into(),
            description: "".into(),
        }
    }

    #[tokio::test]
    async fn follows_pages() {
        let c = Catalog::new();
        c.populate(&discard_log(), &Paged { pages: 3, priorities: None })
            .await;

        assert_eq!(c.printers().len(), 6);
        assert_eq!(c.printer_id("Native 31").as_deref(), Some("id-31"));
        assert_eq!(c.printer_id("Native 41"), None);
        assert!(c.materials().is_empty());
        assert!(c.print_priorities().is_empty());

        c.clear();
        assert!(c.printers().is_empty());
    }

    #[tokio::test]
    async fn priority_fallback() {
        let c = Catalog::new();
        c.populate(&discard_log(), &Paged { pages: 1, priorities: None })
            .await;

        /*
         * No options at all: the old method is the only one that works.
         */
        let mut oi = OptimizationInput::default();
        assert!(c.apply_priority_fallback(&mut oi));
        assert!(oi.use_old_method);

        c.populate(
            &discard_log(),
            &Paged { pages: 1, priorities: Some(vec![quality()]) },
        )
        .await;

        let mut oi = OptimizationInput {
            priority: Some("QUALITY".into()),
            ..Default::default()
        };
        assert!(!c.apply_priority_fallback(&mut oi));
        assert!(!oi.use_old_method);

        oi.priority = Some("SPEED".into());
        assert!(c.apply_priority_fallback(&mut oi));
        assert!(oi.use_old_method);
    }
}
