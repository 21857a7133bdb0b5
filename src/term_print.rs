use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use kestrel_core::pdk::Registry;

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

impl TermPrintable for Registry {
    fn term_print(&self) -> Result<TermPrinted> {
        let mut table = table();

        table.set_header(vec![
            Cell::new("CODE").add_attribute(Attribute::Bold),
            Cell::new("NAME").add_attribute(Attribute::Bold),
            Cell::new("CAPABILITIES").add_attribute(Attribute::Bold),
            Cell::new("PROBES").add_attribute(Attribute::Bold),
        ]);

        for entry in self.iter() {
            let event = entry.create();
            let probes: Vec<String> = event.probes().iter().map(ToString::to_string).collect();

            table.add_row(vec![
                Cell::new(entry.id),
                Cell::new(entry.name)
                    .fg(Color::Cyan)
                    .add_attribute(Attribute::Bold),
                Cell::new(capabilities(self, entry.id).join(", ")).fg(Color::Green),
                Cell::new(probes.join("\n")),
            ]);
        }

        println!("{table}");
        Ok(TermPrinted)
    }
}

/// Capability names of the event registered with `id`.
pub fn capabilities(registry: &Registry, id: u32) -> Vec<String> {
    let Some(entry) = registry.get(id) else {
        return Vec::new();
    };
    let event = entry.create();
    let mut capabilities = Vec::new();
    if event.as_exe_source().is_some() {
        capabilities.push("exe".to_string());
    }
    if event.as_cache_filler().is_some() {
        capabilities.push("argv-cache".to_string());
    }
    if let Some(scanner) = event.as_active_scanner() {
        capabilities.push(format!("scan [{}]", scanner.schedule()));
    }
    capabilities
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
