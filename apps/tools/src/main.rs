use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use server_api::{catalog, orders, ApiContext, FolderSink};
use shared::{
    domain::{NewProduct, OrderId, ProductId, ReferenceTable},
    error::ApiException,
};
use storage::Storage;
use tracing::info;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/multilens.db")]
    database_url: String,
    #[arg(long, env = "ORDER_FOLDER", default_value = "./orders")]
    order_folder: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates the database file and applies migrations.
    InitDb,
    CreateEmployee {
        username: String,
    },
    ListEmployees,
    AddProduct {
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        unavailable: bool,
    },
    ListProducts,
    /// Sets the stock level and availability of an existing product.
    Restock {
        product_id: i64,
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        unavailable: bool,
    },
    AddReference {
        table: ReferenceKind,
        label: String,
    },
    /// Rewrites `<order_folder>/<order_id>.json` for a finished order.
    ExportOrder {
        order_id: i64,
    },
    /// Stocks a handful of demo products.
    SeedDemo,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReferenceKind {
    Speciality,
    SaleType,
    PaymentType,
}

impl From<ReferenceKind> for ReferenceTable {
    fn from(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::Speciality => ReferenceTable::Speciality,
            ReferenceKind::SaleType => ReferenceTable::SaleType,
            ReferenceKind::PaymentType => ReferenceTable::PaymentType,
        }
    }
}

const DEMO_PRODUCTS: &[(&str, f64, i64)] = &[
    ("Lente monofocal 1.56", 89.9, 40),
    ("Lente multifocal digital", 459.0, 12),
    ("Armação acetato", 199.5, 25),
    ("Solução multiuso 360ml", 32.0, 60),
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext::new(storage.clone(), FolderSink::new(&cli.order_folder));

    match cli.command {
        Command::InitDb => {
            storage.health_check().await?;
            info!(database_url = %cli.database_url, "database ready");
        }
        Command::CreateEmployee { username } => {
            let actor_id = server_api::login(&ctx, &username)
                .await
                .map_err(ApiException::from)?;
            println!("employee_id={} username={}", actor_id.0, username.trim());
        }
        Command::ListEmployees => {
            for (actor_id, username) in storage.list_employees().await? {
                println!("{}\t{username}", actor_id.0);
            }
        }
        Command::AddProduct {
            name,
            price,
            amount,
            unavailable,
        } => {
            let product = catalog::create_product(
                &ctx,
                &NewProduct {
                    name,
                    price,
                    amount,
                    available: !unavailable,
                },
            )
            .await
            .map_err(ApiException::from)?;
            println!("created product_id={}", product.product_id.0);
        }
        Command::ListProducts => {
            for product in catalog::list_available_products(&ctx)
                .await
                .map_err(ApiException::from)?
            {
                println!(
                    "{}\t{}\t{:.2}\t{}",
                    product.product_id.0, product.name, product.price, product.amount
                );
            }
        }
        Command::Restock {
            product_id,
            amount,
            unavailable,
        } => {
            anyhow::ensure!(amount >= 0, "stock cannot be negative");
            let updated = storage
                .update_product_stock(ProductId(product_id), amount, !unavailable)
                .await?;
            anyhow::ensure!(updated, "product {product_id} not found");
            info!(product_id, amount, available = !unavailable, "product restocked");
        }
        Command::AddReference { table, label } => {
            let id = storage.insert_reference(table.into(), label.trim()).await?;
            println!("{table:?} id={id}");
        }
        Command::ExportOrder { order_id } => {
            let exported = orders::export_order(&ctx, OrderId(order_id))
                .await
                .map_err(ApiException::from)?;
            println!("wrote {}", exported.path.display());
        }
        Command::SeedDemo => {
            for (name, price, amount) in DEMO_PRODUCTS {
                let product = catalog::create_product(
                    &ctx,
                    &NewProduct {
                        name: (*name).to_string(),
                        price: *price,
                        amount: *amount,
                        available: true,
                    },
                )
                .await
                .map_err(ApiException::from)?;
                info!(product_id = product.product_id.0, name, "demo product stocked");
            }
        }
    }

    Ok(())
}
