use anyhow::Result;

use cmv_core::service::CmvService;

use super::helpers::print_cascade;

pub(crate) fn cmd_config_show(service: &CmvService, json: bool) -> Result<()> {
    let labor_rate = service.labor_rate()?;
    let webhook = service.webhook_url()?;

    if json {
        let value = serde_json::json!({
            "labor_rate_per_hour": labor_rate,
            "webhook_url": webhook,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Labor rate: {labor_rate:.2}/hour");
        match webhook {
            Some(url) => println!("Webhook: {url}"),
            None => println!("Webhook: not configured"),
        }
    }
    Ok(())
}

pub(crate) fn cmd_config_set_labor_rate(service: &CmvService, rate: f64, json: bool) -> Result<()> {
    service.set_labor_rate(rate)?;
    // Labor cost feeds every recipe that books minutes.
    let cascade = service.recalc_all()?;

    if json {
        let value = serde_json::json!({
            "labor_rate_per_hour": rate,
            "cascade": cascade,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Labor rate set to {rate:.2}/hour.");
        print_cascade(&cascade);
    }
    Ok(())
}

pub(crate) fn cmd_config_set_webhook(service: &CmvService, url: &str, json: bool) -> Result<()> {
    service.set_webhook(url)?;

    if json {
        println!("{}", serde_json::json!({ "webhook_url": url }));
    } else {
        println!("Webhook configured. Price alerts will be posted there.");
    }
    Ok(())
}

pub(crate) fn cmd_config_clear_webhook(service: &CmvService, json: bool) -> Result<()> {
    let removed = service.clear_webhook()?;

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if removed {
        println!("Webhook removed.");
    } else {
        println!("No webhook was configured.");
    }
    Ok(())
}

pub(crate) fn cmd_recalc(service: &CmvService, json: bool) -> Result<()> {
    let cascade = service.recalc_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cascade)?);
    } else if cascade.is_empty() {
        println!("All recipe costs are already up to date.");
    } else {
        print_cascade(&cascade);
    }
    Ok(())
}
