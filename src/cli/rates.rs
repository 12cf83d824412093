use super::ui;
use crate::core::rate::Currency;
use crate::service::ConversionService;
use anyhow::Result;
use comfy_table::{Cell, Color};
use futures::future::join_all;

pub async fn run(service: &ConversionService) -> Result<()> {
    let pb = ui::new_progress_bar(Currency::ALL.len() as u64);
    let lookups = join_all(Currency::ALL.map(|currency| {
        let pb = pb.clone();
        async move {
            let lookup = service.quote(currency).await;
            pb.inc(1);
            (currency, lookup)
        }
    }))
    .await;
    pb.finish_and_clear();

    println!(
        "\n{}",
        ui::style_text("Exchange rates (MXN)", ui::StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Currency"),
        ui::header_cell("Buy"),
        ui::header_cell("Sell"),
        ui::header_cell("Source"),
        ui::header_cell("Strategy"),
    ]);

    let mut failures = Vec::new();
    for (currency, lookup) in lookups {
        match lookup {
            Ok(lookup) => {
                let quote = lookup.value;
                table.add_row(vec![
                    Cell::new(currency.code()),
                    ui::rate_cell(quote.buy_rate),
                    ui::rate_cell(quote.sell_rate),
                    ui::source_cell(quote.source),
                    Cell::new(&quote.strategy),
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(currency.code()).fg(Color::Red),
                    ui::na_cell(true),
                    ui::na_cell(true),
                    ui::na_cell(true),
                    ui::na_cell(true),
                ]);
                failures.push(format!("{currency}: {e}"));
            }
        }
    }
    println!("{table}");

    for failure in &failures {
        println!("{}", ui::style_text(failure, ui::StyleType::Error));
    }
    Ok(())
}
