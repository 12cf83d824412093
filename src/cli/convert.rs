use super::ui;
use crate::core::convert::ConversionRequest;
use crate::service::ConversionService;
use anyhow::Result;
use comfy_table::Cell;

pub async fn run(service: &ConversionService, request: &ConversionRequest) -> Result<()> {
    let spinner = ui::new_spinner(&format!("Fetching {} rates...", request.currency));
    let result = service.convert(request).await;
    spinner.finish_and_clear();
    let conversion = result?.value;

    println!(
        "\n{}",
        ui::style_text(
            &format!(
                "{} {} {}",
                conversion.operation, conversion.amount, conversion.currency
            ),
            ui::StyleType::Title
        )
    );

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Rate"),
        ui::header_cell("Buy"),
        ui::header_cell("Sell"),
        ui::header_cell("MXN"),
        ui::header_cell("Source"),
        ui::header_cell("Strategy"),
    ]);
    table.add_row(vec![
        ui::rate_cell(conversion.rate),
        ui::rate_cell(conversion.buy_rate),
        ui::rate_cell(conversion.sell_rate),
        ui::mxn_cell(conversion.mxn),
        ui::source_cell(conversion.source),
        Cell::new(&conversion.strategy),
    ]);
    println!("{table}");
    println!(
        "{}",
        ui::style_text(
            &format!("Rates as of {}", conversion.timestamp.to_rfc3339()),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}
