//! OData Server Binary
//!
//! Serves a small in-memory `Shop` model with entity CRUD, query options,
//! ETags and `$batch`.

use anyhow::Result;
use odata_core::edm::{EdmEnumType, EdmFunction, EdmProperty, EdmStructuredType, EdmTypeRef, Facets};
use odata_core::{
    ComplexValue, EdmModel, EdmPrimitiveKind, Entity, ODataError, PrimitiveValue, PropertyValue, TypeRegistry,
};
use odata_server::{init_logging, EntityService, ODataServer, ServerConfig};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

fn shop_model() -> EdmModel {
    EdmModel::new("Shop", Arc::new(TypeRegistry::standard()))
        .with_enum_type(
            EdmEnumType::new("Tier")
                .member("Standard", 0)
                .member("Silver", 1)
                .member("Gold", 2),
        )
        .with_complex_type(
            EdmStructuredType::new("Address")
                .property(EdmProperty::primitive("Street", EdmPrimitiveKind::String))
                .property(EdmProperty::primitive("City", EdmPrimitiveKind::String)),
        )
        .with_entity_type(
            EdmStructuredType::new("Customer")
                .key("ID")
                .property(EdmProperty::primitive("ID", EdmPrimitiveKind::Int32).with_facets(Facets::non_nullable()))
                .property(
                    EdmProperty::primitive("Name", EdmPrimitiveKind::String)
                        .with_facets(Facets::non_nullable().with_max_length(64)),
                )
                .property(EdmProperty::new("Tier", EdmTypeRef::Enum("Shop.Tier".into())))
                .property(
                    EdmProperty::primitive("Balance", EdmPrimitiveKind::Decimal)
                        .with_facets(Facets::default().with_precision(12).with_scale(2)),
                )
                .property(EdmProperty::primitive("Joined", EdmPrimitiveKind::Date))
                .property(EdmProperty::new("Address", EdmTypeRef::Complex("Shop.Address".into()))),
        )
        .with_entity_type(
            EdmStructuredType::new("Order")
                .key("ID")
                .property(EdmProperty::primitive("ID", EdmPrimitiveKind::Int64).with_facets(Facets::non_nullable()))
                .property(EdmProperty::primitive("CustomerID", EdmPrimitiveKind::Int32))
                .property(EdmProperty::primitive("Total", EdmPrimitiveKind::Decimal))
                .property(EdmProperty::primitive("Placed", EdmPrimitiveKind::DateTimeOffset)),
        )
        .with_function(
            EdmFunction::bound("IsPreferred", "Customer", EdmTypeRef::Primitive(EdmPrimitiveKind::Boolean))
                .parameter("threshold", EdmTypeRef::Primitive(EdmPrimitiveKind::Decimal)),
        )
        .with_entity_set("Customers", "Customer")
        .with_entity_set("Orders", "Order")
}

/// `true` when the customer's balance reaches `threshold`.
fn is_preferred(
    customer: &Entity,
    parameters: &[(String, odata_core::TypedOperand)],
) -> Result<PropertyValue, ODataError> {
    let threshold = parameters
        .iter()
        .find(|(name, _)| name == "threshold")
        .map(|(_, operand)| operand.value().clone())
        .ok_or_else(|| ODataError::bad_request("IsPreferred requires a threshold"))?;
    let balance = customer.property("Balance").and_then(PropertyValue::as_primitive);
    let preferred = match (balance, threshold) {
        (Some(PrimitiveValue::Decimal(balance)), PrimitiveValue::Decimal(threshold)) => *balance >= threshold,
        _ => false,
    };
    Ok(PropertyValue::from(preferred))
}

fn decimal(text: &str) -> Result<PrimitiveValue> {
    Ok(PrimitiveValue::Decimal(bigdecimal::BigDecimal::from_str(text)?))
}

fn seed(service: &EntityService) -> Result<()> {
    let customers = [
        ("Alfreds", 2, "1200.00", "Obere Str. 57", "Berlin"),
        ("Bottom-Dollar", 0, "35.10", "23 Tsawassen Blvd.", "Tsawassen"),
        ("Chop-suey", 1, "410.75", "Hauptstr. 29", "Bern"),
    ];
    for (name, tier, balance, street, city) in customers {
        service.insert(
            "Customers",
            Entity::new("Customer")
                .with("Name", name)
                .with(
                    "Tier",
                    PropertyValue::Enum {
                        type_name: "Shop.Tier".to_string(),
                        value: tier,
                    },
                )
                .with("Balance", decimal(balance)?)
                .with(
                    "Address",
                    ComplexValue::new("Shop.Address").with("Street", street).with("City", city),
                ),
        )?;
    }
    for (customer, total) in [(1, "99.90"), (1, "12.00"), (3, "250.00")] {
        service.insert(
            "Orders",
            Entity::new("Order").with("CustomerID", customer).with("Total", decimal(total)?),
        )?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;
    let _guard = init_logging(&config.log_dir, &config.log_prefix)?;

    info!("Starting OData server");
    info!(addr = %config.addr(), root = %config.service_root, "configuration loaded");

    let service = EntityService::new(Arc::new(shop_model()), &config.base_uri())?
        .with_function("IsPreferred", is_preferred);
    seed(&service)?;

    let server = ODataServer::new(config, service)?;
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
