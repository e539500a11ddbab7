//! Price feeds: LMP, ancillary services and CRR auction results.

use chrono::{DateTime, Utc};
use medallion_types::{
    AncillaryPrice, AsProduct, CongestionRevenueRight, DataType, HedgeType, LmpPrice, MarketRun,
    PipelineError, SilverPayload, TimeOfUse,
};
use rust_decimal::Decimal;

use super::fields::Fields;

pub fn lmp(
    data_type: DataType,
    f: &Fields<'_>,
) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let observed_at = f.instant("timestamp")?;
    let node = f.string("node")?;
    let lmp_total = f.decimal("lmp_usd_per_mwh")?;
    let lmp_energy = f
        .opt_decimal("lmp_energy_usd_per_mwh")?
        .unwrap_or(Decimal::ZERO);
    let lmp_congestion = f
        .opt_decimal("lmp_congestion_usd_per_mwh")?
        .unwrap_or(Decimal::ZERO);
    let lmp_losses = f
        .opt_decimal("lmp_marginal_loss_usd_per_mwh")?
        .unwrap_or(Decimal::ZERO);
    let declared_run =
        f.opt_declared("market_run_id", MarketRun::parse_declared, MarketRun::DECLARED)?;

    let market_run = match (data_type, declared_run) {
        (DataType::LmpDam, None | Some(MarketRun::Dam)) => MarketRun::Dam,
        (DataType::LmpRtm, None) => MarketRun::Rtm,
        (DataType::LmpRtm, Some(run)) if run != MarketRun::Dam => run,
        (_, Some(run)) => {
            return Err(PipelineError::validation(
                "market_run_id",
                format!("{run} does not match data type {data_type}"),
            ));
        }
        (_, None) => return Err(PipelineError::unsupported_type(data_type.as_str())),
    };

    let cleared_mwh = f.opt_non_negative("cleared_mwh")?;

    Ok((
        observed_at,
        SilverPayload::Lmp(LmpPrice {
            node,
            market_run,
            lmp_total,
            lmp_energy,
            lmp_congestion,
            lmp_losses,
            cleared_mwh,
        }),
    ))
}

pub fn ancillary(
    data_type: DataType,
    f: &Fields<'_>,
) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let observed_at = f.instant("timestamp")?;
    let market_run = match data_type {
        DataType::AsDam => MarketRun::Dam,
        DataType::AsRtm => MarketRun::Rtm,
        other => return Err(PipelineError::unsupported_type(other.as_str())),
    };
    Ok((
        observed_at,
        SilverPayload::Ancillary(AncillaryPrice {
            region: f.string("region")?,
            product: f.declared("product", AsProduct::parse_declared, AsProduct::DECLARED)?,
            market_run,
            clearing_price: f.decimal("clearing_price_usd_per_mw")?,
            cleared_mw: f.opt_non_negative("cleared_mw")?,
        }),
    ))
}

pub fn crr(f: &Fields<'_>) -> Result<(DateTime<Utc>, SilverPayload), PipelineError> {
    let observed_at = f.instant("timestamp")?;
    Ok((
        observed_at,
        SilverPayload::Crr(CongestionRevenueRight {
            crr_id: f.string("crr_id")?,
            source_node: f.string("source_node")?,
            sink_node: f.string("sink_node")?,
            time_of_use: f.declared("time_of_use", TimeOfUse::parse_declared, TimeOfUse::DECLARED)?,
            hedge_type: f.declared("hedge_type", HedgeType::parse_declared, HedgeType::DECLARED)?,
            mw: f.non_negative("mw")?,
            clearing_price: f.decimal("clearing_price_usd_per_mw")?,
        }),
    ))
}
