//! Implement `stack_model::Configuration` for resource argument and attribute structs.

use proc_macro::{self, TokenStream};

#[macro_use]
extern crate quote;

#[proc_macro_derive(Configuration)]
pub fn derive_configuration(input: TokenStream) -> TokenStream {
    let ast = match syn::parse::<syn::DeriveInput>(input) {
        Ok(ast) => ast,
        Err(e) => return e.to_compile_error().into(),
    };
    let ident = ast.ident;
    let (impl_generics, type_generics, where_clause) = ast.generics.split_for_impl();

    quote! {
       impl #impl_generics stack_model::Configuration for #ident #type_generics #where_clause {}
    }
    .into()
}
