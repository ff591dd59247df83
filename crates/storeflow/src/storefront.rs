//! Demo storefront catalogue.
//!
//! Locator chains for the demo store's UI and journey builders composing them
//! into steps. Everything here is data: the engine in [`crate::journey`] does
//! the driving.

use crate::config::SuiteConfig;
use crate::download::DownloadStable;
use crate::journey::{Journey, Step};
use crate::locator::{xpath_literal, LocatorChain, Selector};
use crate::wait::{
    all_of, any_of, element_absent, element_count_above, element_present, element_text_contains,
    not, text_snapshot, title_contains, url_contains, WaitCondition,
};
use serde::{Deserialize, Serialize};

/// Locator chains for the demo store
pub mod locators {
    use super::{xpath_literal, LocatorChain, Selector};

    /// Product tiles on the shelf
    #[must_use]
    pub fn shelf_items() -> LocatorChain {
        LocatorChain::of(Selector::css("div.shelf-item"))
    }

    /// Items inside the floating cart
    #[must_use]
    pub fn cart_items() -> LocatorChain {
        LocatorChain::of(Selector::css("div.float-cart__shelf-container .shelf-item"))
            .or(Selector::css("div.float-cart .shelf-item"))
    }

    /// The cart panel in its open state
    #[must_use]
    pub fn cart_open() -> LocatorChain {
        LocatorChain::of(Selector::css("div.float-cart.float-cart--open"))
    }

    /// Triggers that open the cart
    #[must_use]
    pub fn cart_toggle() -> LocatorChain {
        LocatorChain::of(Selector::css("div.float-cart__header"))
            .or(Selector::css(
                "div.float-cart__toggle, .cart-toggle, .bag, button.float-cart__open",
            ))
            .or(Selector::css("header .bag"))
            .visible_only()
    }

    /// Add-to-cart button of the named product
    #[must_use]
    pub fn add_to_cart(product: &str) -> LocatorChain {
        let name = xpath_literal(product);
        LocatorChain::of(Selector::xpath(format!(
            "//div[contains(@class,'shelf-item')][.//p[contains(@class,'shelf-item__title') and normalize-space(.)={name}]]//div[contains(@class,'shelf-item__buy-btn')]"
        )))
        .or(Selector::xpath(format!(
            "//p[normalize-space(.)={name}]/following-sibling::div[contains(@class,'buy-btn')]"
        )))
    }

    /// Add-to-cart button of the first product
    #[must_use]
    pub fn first_add_to_cart() -> LocatorChain {
        LocatorChain::of(Selector::css("div.shelf-item .shelf-item__buy-btn"))
    }

    /// Checkout buttons in the cart
    #[must_use]
    pub fn checkout_button() -> LocatorChain {
        LocatorChain::of(Selector::css("div.buy-btn"))
            .or(Selector::css("button.checkout, a.checkout, .checkout-button"))
            .visible_only()
    }

    /// Sign-in link in the header
    #[must_use]
    pub fn sign_in() -> LocatorChain {
        LocatorChain::of(Selector::id("signin"))
    }

    /// Username dropdown on the login form
    #[must_use]
    pub fn username_dropdown() -> LocatorChain {
        LocatorChain::of(Selector::id("username"))
    }

    /// Password dropdown on the login form
    #[must_use]
    pub fn password_dropdown() -> LocatorChain {
        LocatorChain::of(Selector::id("password"))
    }

    /// An option in an open dropdown
    #[must_use]
    pub fn dropdown_option(value: &str) -> LocatorChain {
        let value = xpath_literal(value);
        LocatorChain::of(Selector::xpath(format!(
            "//div[contains(@id,'react-select') and normalize-space(.)={value}]"
        )))
        .or(Selector::xpath(format!(
            "//div[contains(@class,'option') and normalize-space(.)={value}]"
        )))
    }

    /// Login submit button
    #[must_use]
    pub fn login_button() -> LocatorChain {
        LocatorChain::of(Selector::id("login-btn"))
    }

    /// Signals that a user is logged in
    #[must_use]
    pub fn logged_in_marker() -> LocatorChain {
        LocatorChain::of(Selector::css("span.username"))
            .or(Selector::css(".user-info, #user, .logout, #logout"))
    }

    /// Elements showing the demo user's name
    #[must_use]
    pub fn username_text() -> LocatorChain {
        LocatorChain::of(Selector::xpath(
            "//*[contains(text(),'demouser') or contains(text(),'DemoUser') or contains(text(),'demo user')]",
        ))
    }

    /// Shipping form field by input id
    #[must_use]
    pub fn shipping_field(id: &str) -> LocatorChain {
        LocatorChain::of(Selector::id(id))
    }

    /// Shipping form submit
    #[must_use]
    pub fn shipping_submit() -> LocatorChain {
        LocatorChain::of(Selector::id("checkout-shipping-continue"))
            .or(Selector::css("form button[type='submit']"))
    }

    /// Order placed confirmation message
    #[must_use]
    pub fn confirmation_message() -> LocatorChain {
        LocatorChain::of(Selector::xpath(
            "//*[contains(text(),'Your Order has been successfully placed') or contains(.,'Your order number')]",
        ))
    }

    /// Payment form (some store variants ask for payment first)
    #[must_use]
    pub fn payment_form() -> LocatorChain {
        LocatorChain::of(Selector::css("div.payment-form, #payment, form.payment"))
    }

    /// Order receipt download link
    #[must_use]
    pub fn download_pdf() -> LocatorChain {
        LocatorChain::of(Selector::id("downloadpdf"))
    }

    /// Continue Shopping after an order
    #[must_use]
    pub fn continue_shopping() -> LocatorChain {
        LocatorChain::of(Selector::xpath(
            "//button[contains(translate(normalize-space(.),'abcdefghijklmnopqrstuvwxyz','ABCDEFGHIJKLMNOPQRSTUVWXYZ'),'CONTINUE SHOPPING')]",
        ))
        .or(Selector::xpath(
            "//button[contains(normalize-space(.),'Continue Shopping')]",
        ))
        .or(Selector::css(
            "button.button--tertiary, button.optimizedCheckout-buttonSecondary, .continueButtonContainer button",
        ))
        .or(Selector::css("a.continue, .continue, .btn-continue"))
    }

    /// Heading proving a nav section loaded
    #[must_use]
    pub fn section_heading(labels: &[&str]) -> LocatorChain {
        let tests: Vec<String> = labels
            .iter()
            .map(|l| format!("contains(normalize-space(.),{})", xpath_literal(l)))
            .collect();
        LocatorChain::of(Selector::xpath(format!(
            "//*[({}) and (self::h1 or self::h2 or self::strong)]",
            tests.join(" or ")
        )))
    }

    /// Logout affordances, first displayed match
    #[must_use]
    pub fn logout() -> LocatorChain {
        LocatorChain::of(Selector::id("logout"))
            .or(Selector::xpath(
                "//*[(self::a or self::span or self::button) and (normalize-space(.)='Logout' or normalize-space(.)='logout')]",
            ))
            .or(Selector::css(
                "nav .logout-link, .logout-link, a.logout, a[href*='logout']",
            ))
            .visible_only()
    }

    /// Menus that may hide the logout link
    #[must_use]
    pub fn user_menu() -> LocatorChain {
        LocatorChain::of(Selector::css(".username, .user-menu, nav .user, .UserNav_root"))
    }

    /// Product search input
    #[must_use]
    pub fn search_box() -> LocatorChain {
        LocatorChain::of(Selector::css("input[type='search']"))
            .or(Selector::css("input[name='search'], #search, input[placeholder*='Search']"))
            .visible_only()
    }

    /// Search submit
    #[must_use]
    pub fn search_button() -> LocatorChain {
        LocatorChain::of(Selector::css("button[type='submit'].search, .search-button"))
            .or(Selector::xpath(
                "//button[normalize-space(.)='Search' or @aria-label='Search']",
            ))
    }

    /// Product titles on the shelf
    #[must_use]
    pub fn product_titles() -> LocatorChain {
        LocatorChain::of(Selector::css("p.shelf-item__title"))
    }

    /// Vendor filter checkbox; the styled label takes the click
    #[must_use]
    pub fn vendor_filter(vendor: &str) -> LocatorChain {
        let vendor = xpath_literal(vendor);
        LocatorChain::of(Selector::xpath(format!(
            "//input[@type='checkbox' and @value={vendor}]/following-sibling::span[contains(@class,'checkmark')]"
        )))
        .or(Selector::xpath(format!(
            "//span[contains(@class,'checkmark') and normalize-space(.)={vendor}]"
        )))
    }

    /// "N Product(s) found." counter above the shelf
    #[must_use]
    pub fn products_found() -> LocatorChain {
        LocatorChain::of(Selector::css("div.products-found span"))
            .or(Selector::css(".products-found"))
    }

    /// Sort order dropdown
    #[must_use]
    pub fn sort_select() -> LocatorChain {
        LocatorChain::of(Selector::css("div.sort select")).or(Selector::css("select"))
    }

    fn cart_item_path(product: &str) -> String {
        format!(
            "//div[contains(@class,'float-cart')]//div[contains(@class,'shelf-item')][.//p[contains(@class,'title') and contains(normalize-space(.),{})]]",
            xpath_literal(product)
        )
    }

    /// The cart row of the named product
    #[must_use]
    pub fn cart_item(product: &str) -> LocatorChain {
        LocatorChain::of(Selector::xpath(cart_item_path(product)))
    }

    /// Quantity "+" button of the named product's cart row
    #[must_use]
    pub fn increase_quantity(product: &str) -> LocatorChain {
        let row = cart_item_path(product);
        LocatorChain::of(Selector::xpath(format!(
            "{row}//button[contains(@class,'change-product-button') and normalize-space(.)='+']"
        )))
        .or(Selector::xpath(format!("{row}//button[normalize-space(.)='+']")))
    }

    /// Remove control of the named product's cart row
    #[must_use]
    pub fn remove_item(product: &str) -> LocatorChain {
        let row = cart_item_path(product);
        LocatorChain::of(Selector::xpath(format!(
            "{row}//div[contains(@class,'shelf-item__del')]"
        )))
        .or(Selector::xpath(format!(
            "{row}//*[contains(@class,'remove') or contains(@class,'delete')]"
        )))
    }

    /// Cart subtotal value
    #[must_use]
    pub fn subtotal() -> LocatorChain {
        LocatorChain::of(Selector::css("p.sub-price__val"))
            .or(Selector::css(".float-cart__footer .sub-price"))
    }
}

/// Navigation sections checked after an order
pub const NAV_SECTIONS: [(&str, &str, &[&str]); 3] = [
    ("orders", "/orders", &["Orders"]),
    ("favourites", "/favourites", &["Favourites", "Favorites"]),
    ("offers", "/offers", &["Offers", "Offer"]),
];

/// Shipping form contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Address line
    pub address: String,
    /// State / province
    pub state: String,
    /// Postal code
    pub postal_code: String,
}

impl Default for ShippingDetails {
    fn default() -> Self {
        Self {
            first_name: "Harini".to_string(),
            last_name: "J".to_string(),
            address: "123 Demo St".to_string(),
            state: "CA".to_string(),
            postal_code: "90001".to_string(),
        }
    }
}

impl ShippingDetails {
    /// (input id, value) pairs in form order
    #[must_use]
    pub fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("firstNameInput", self.first_name.as_str()),
            ("lastNameInput", self.last_name.as_str()),
            ("addressLine1Input", self.address.as_str()),
            ("provinceInput", self.state.as_str()),
            ("postCodeInput", self.postal_code.as_str()),
        ]
    }
}

/// Journey builders for the demo store
#[derive(Debug, Clone)]
pub struct Storefront {
    config: SuiteConfig,
}

impl Storefront {
    /// Catalogue bound to `config`
    #[must_use]
    pub const fn new(config: SuiteConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &SuiteConfig {
        &self.config
    }

    fn journey(&self, name: &str) -> Journey {
        Journey::new(name).with_wait(self.config.wait)
    }

    /// Load the home page and wait for products
    #[must_use]
    pub fn open_home(&self) -> Step {
        Step::new("open home page")
            .goto(self.config.url("/"))
            .expect(element_count_above(locators::shelf_items(), 0).boxed())
    }

    /// Sign in with the configured credentials
    #[must_use]
    pub fn login_steps(&self) -> Vec<Step> {
        vec![
            Step::new("open sign in")
                .on(locators::sign_in())
                .click()
                .expect(element_present(locators::username_dropdown()).boxed()),
            Step::new("open username list")
                .on(locators::username_dropdown())
                .click(),
            Step::new("choose username")
                .on(locators::dropdown_option(&self.config.username))
                .click(),
            Step::new("open password list")
                .on(locators::password_dropdown())
                .click(),
            Step::new("choose password")
                .on(locators::dropdown_option(&self.config.password))
                .click(),
            Step::new("submit login")
                .on(locators::login_button())
                .click()
                .expect(
                    any_of(vec![
                        element_text_contains(locators::logged_in_marker(), &self.config.username)
                            .boxed(),
                        element_present(locators::username_text()).boxed(),
                    ])
                    .boxed(),
                ),
        ]
    }

    /// Add `product` and check it shows up in the cart
    #[must_use]
    pub fn add_to_cart_steps(&self, product: &str) -> Vec<Step> {
        vec![
            Step::new(format!("add {product} to cart"))
                .on(locators::add_to_cart(product))
                .click()
                .settle(self.config.settle())
                .with_wait(self.config.short_wait())
                .expect(element_count_above(locators::cart_items(), 0).boxed()),
            Step::new("open cart")
                .on(locators::cart_toggle())
                .click()
                .optional()
                .unless_present(locators::cart_open()),
            Step::new(format!("cart contains {product}"))
                .with_wait(self.config.short_wait())
                .expect(element_text_contains(locators::cart_items(), product).boxed()),
        ]
    }

    /// Proceed to checkout and submit the shipping form
    #[must_use]
    pub fn checkout_steps(&self, shipping: &ShippingDetails) -> Vec<Step> {
        let mut steps = vec![Step::new("proceed to checkout")
            .on(locators::checkout_button())
            .click()
            .or_navigate(self.config.url("/checkout"))
            .expect(element_present(locators::shipping_field("firstNameInput")).boxed())];
        for (id, value) in shipping.fields() {
            steps.push(
                Step::new(format!("fill {id}"))
                    .on(locators::shipping_field(id))
                    .fill(value),
            );
        }
        steps.push(
            Step::new("submit shipping")
                .on(locators::shipping_submit())
                .click()
                .expect(
                    any_of(vec![
                        url_contains("/confirmation").boxed(),
                        element_present(locators::confirmation_message()).boxed(),
                        element_present(locators::download_pdf()).boxed(),
                        element_present(locators::payment_form()).boxed(),
                    ])
                    .boxed(),
                ),
        );
        steps
    }

    /// Confirm, download the receipt and return to the shelf
    #[must_use]
    pub fn confirmation_steps(&self) -> Vec<Step> {
        let download = &self.config.download;
        vec![
            Step::new("order confirmed").expect(
                any_of(vec![
                    url_contains("/confirmation").boxed(),
                    element_present(locators::confirmation_message()).boxed(),
                ])
                .boxed(),
            ),
            Step::new("download receipt")
                .on(locators::download_pdf())
                .click()
                .clearing(&download.dir)
                .with_wait(download.wait_options())
                .expect(DownloadStable::new(&download.dir, &download.suffix).boxed()),
            Step::new("continue shopping")
                .on(locators::continue_shopping())
                .click()
                .expect(
                    all_of(vec![
                        not(url_contains("/confirmation").boxed()).boxed(),
                        element_count_above(locators::shelf_items(), 0).boxed(),
                    ])
                    .boxed(),
                ),
        ]
    }

    /// Visit orders, favourites and offers
    #[must_use]
    pub fn navigation_steps(&self) -> Vec<Step> {
        NAV_SECTIONS
            .iter()
            .map(|(id, path, labels)| {
                Step::new(format!("open {id}"))
                    .on(Selector::id(*id))
                    .click()
                    .expect(
                        any_of(vec![
                            url_contains(*path).boxed(),
                            element_present(locators::section_heading(labels)).boxed(),
                        ])
                        .boxed(),
                    )
            })
            .collect()
    }

    /// Log out and verify the session ended
    #[must_use]
    pub fn logout_steps(&self) -> Vec<Step> {
        vec![
            Step::new("open user menu")
                .on(locators::user_menu())
                .click()
                .optional()
                .unless_present(locators::logout())
                .settle(self.config.settle()),
            Step::new("log out").on(locators::logout()).click(),
            Step::new("verify logged out").expect(
                all_of(vec![
                    element_present(locators::sign_in()).boxed(),
                    element_absent(locators::username_text()).boxed(),
                ])
                .boxed(),
            ),
        ]
    }

    /// Home page shows products and the store title
    #[must_use]
    pub fn home_page_loads(&self) -> Journey {
        self.journey("home page loads").step(self.open_home()).step(
            Step::new("store title").expect(title_contains("StackDemo").boxed()),
        )
    }

    /// Sign in from the home page
    #[must_use]
    pub fn login(&self) -> Journey {
        self.journey("login")
            .step(self.open_home())
            .with_steps(self.login_steps())
    }

    /// Add one product to the cart
    #[must_use]
    pub fn add_product_to_cart(&self, product: &str) -> Journey {
        self.journey(&format!("add {product} to cart"))
            .step(self.open_home())
            .with_steps(self.add_to_cart_steps(product))
    }

    /// Login, add the first product, submit shipping
    #[must_use]
    pub fn checkout_shipping(&self, shipping: &ShippingDetails) -> Journey {
        self.journey("checkout shipping")
            .step(self.open_home())
            .with_steps(self.login_steps())
            .step(
                Step::new("add first product to cart")
                    .on(locators::first_add_to_cart())
                    .click()
                    .with_wait(self.config.short_wait())
                    .expect(element_count_above(locators::cart_items(), 0).boxed()),
            )
            .with_steps(self.checkout_steps(shipping))
    }

    /// Search for `product` and wait for a matching shelf title
    #[must_use]
    pub fn search_product(&self, product: &str) -> Journey {
        self.journey(&format!("search {product}"))
            .step(self.open_home())
            .step(
                Step::new("enter search text")
                    .on(locators::search_box())
                    .fill(product),
            )
            .step(
                Step::new("submit search")
                    .on(locators::search_button())
                    .click()
                    .expect(element_text_contains(locators::product_titles(), product).boxed()),
            )
    }

    /// Filter the shelf to one vendor and apply a sort order
    #[must_use]
    pub fn filter_and_sort(&self, vendor: &str, order: &str) -> Journey {
        self.journey(&format!("filter {vendor} sorted {order}"))
            .step(self.open_home())
            .step(
                Step::new(format!("filter by {vendor}"))
                    .on(locators::vendor_filter(vendor))
                    .click()
                    .settle(self.config.settle())
                    .expect(
                        all_of(vec![
                            element_text_contains(locators::products_found(), "found").boxed(),
                            element_count_above(locators::shelf_items(), 0).boxed(),
                        ])
                        .boxed(),
                    ),
            )
            .step(
                Step::new(format!("sort {order}"))
                    .on(locators::sort_select())
                    .select(order)
                    .expect(element_count_above(locators::shelf_items(), 0).boxed()),
            )
    }

    /// Add `product`, raise its quantity and wait for the subtotal to move
    #[must_use]
    pub fn increase_quantity(&self, product: &str) -> Journey {
        let subtotal = text_snapshot(locators::subtotal());
        self.journey(&format!("increase {product} quantity"))
            .step(self.open_home())
            .with_steps(self.add_to_cart_steps(product))
            .step(
                Step::new("note subtotal")
                    .with_wait(self.config.short_wait())
                    .expect(subtotal.record().boxed()),
            )
            .step(
                Step::new(format!("increase {product} quantity"))
                    .on(locators::increase_quantity(product))
                    .click()
                    .with_wait(self.config.short_wait())
                    .expect(subtotal.changed().boxed()),
            )
    }

    /// Add `product` and remove it again
    #[must_use]
    pub fn remove_from_cart(&self, product: &str) -> Journey {
        self.journey(&format!("remove {product} from cart"))
            .step(self.open_home())
            .with_steps(self.add_to_cart_steps(product))
            .step(
                Step::new(format!("remove {product}"))
                    .on(locators::remove_item(product))
                    .click()
                    .with_wait(self.config.short_wait())
                    .expect(element_absent(locators::cart_item(product)).boxed()),
            )
    }

    /// Add two products and check both stay in the cart
    #[must_use]
    pub fn add_two_products(&self, first: &str, second: &str) -> Journey {
        self.journey(&format!("add {first} and {second} to cart"))
            .step(self.open_home())
            .with_steps(self.add_to_cart_steps(first))
            .step(
                Step::new(format!("add {second} to cart"))
                    .on(locators::add_to_cart(second))
                    .click()
                    .settle(self.config.settle())
                    .with_wait(self.config.short_wait())
                    .expect(
                        all_of(vec![
                            element_present(locators::cart_item(first)).boxed(),
                            element_present(locators::cart_item(second)).boxed(),
                        ])
                        .boxed(),
                    ),
            )
    }

    /// Login through logout with download and navigation checks
    #[must_use]
    pub fn full_checkout(&self, product: &str, shipping: &ShippingDetails) -> Journey {
        self.journey("full checkout")
            .step(self.open_home())
            .with_steps(self.login_steps())
            .with_steps(self.add_to_cart_steps(product))
            .with_steps(self.checkout_steps(shipping))
            .with_steps(self.confirmation_steps())
            .with_steps(self.navigation_steps())
            .with_steps(self.logout_steps())
    }
}
